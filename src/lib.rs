//! SmartTpl: a template engine for a Smarty-like dialect.
//!
//! Template source is parsed into an immutable syntax tree and compiled to
//! native code at load time; the same tree can also be translated to C
//! source, built into a shared object out of band, and loaded back later.
//! Both executors drive the identical callback ABI at render time, so
//! their output is byte for byte the same.
//!
//! ```
//! use smarttpl::{Data, Template};
//!
//! let template = Template::from_source("Hello {$name}!").unwrap();
//!
//! let mut data = Data::new();
//! data.assign("name", "world");
//!
//! assert_eq!(template.process(&data).unwrap(), "Hello world!");
//! ```
//!
//! Variables come from a [`Data`] binding and can be scalars, lists, maps,
//! dates or caller-implemented [`Value`] types. Output of `{$var}` runs
//! through the escaper selected by the `process` encoding argument;
//! modifiers (`{$var|tolower}`) transform values in a pipe, and custom
//! ones register on the `Data` by name.

mod ast;
mod bytecode;
mod ccode;
mod data;
mod error;
mod escaper;
mod generator;
mod lexer;
mod library;
mod modifier;
mod parser;
mod runtime;
mod template;
mod value;

pub use data::Data;
pub use error::{CompileError, Error, RuntimeError, SourceLocation};
pub use escaper::Escaper;
pub use modifier::{Modifier, Parameters};
pub use template::Template;
pub use value::{
    BooleanValue, DateValue, DoubleValue, ListValue, MapValue, NullValue, NumericValue,
    StringValue, Value, ValueIterator, VariantValue,
};
