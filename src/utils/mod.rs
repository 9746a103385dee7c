pub mod json;
pub mod string_enum;
pub mod time;
