//! C9 — concrete `Protocol` implementations, one per wire convention §4.9
//! names: JSON wrapped in a sentinel tag (Hermes/Gemma), per-tool XML
//! elements (morph-XML), and UI-TARS's `<function=...><parameter=...>`
//! pseudo-XML.

pub mod json_tag;
pub mod ui_tars;
pub mod xml_element;

pub use json_tag::JsonTagProtocol;
pub use ui_tars::UiTarsProtocol;
pub use xml_element::XmlElementProtocol;
