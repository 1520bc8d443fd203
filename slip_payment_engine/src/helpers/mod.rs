mod reference;

pub use reference::normalize_reference;
