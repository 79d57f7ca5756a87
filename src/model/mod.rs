pub mod command_text;
pub mod field;
pub mod template;

pub use field::{Field, FieldAttr, FieldType, FieldValue};
pub use template::{AttrValue, RefValue, Template, TemplateAttr};
