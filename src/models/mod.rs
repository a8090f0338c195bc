// Data models: upstream wire format and run records

pub mod openai;
pub mod run;
