//! # etl
//!
//! A streaming parser framework for the ETL term language.
//!
//! The pipeline is pull-driven: lexer, phrase parser and term parser all
//! expose the same `start`/`parse`/`read` protocol so arbitrarily large
//! inputs can be processed one pending item at a time. The term parser is
//! driven by compiled grammars; the [grammar compiler](etl::grammar::compiler)
//! bootstraps itself from a hard-wired seed set and resolves imported
//! grammars through the [resolver](etl::resolver).

pub mod etl;
