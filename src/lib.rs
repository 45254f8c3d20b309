//! Flattens nested json documents into fixed-width tables.
//!
//! `{"geo": {"coordinates": [-99.9, 16.88]}}` becomes the columns `geo_coordinates_0` and
//! `geo_coordinates_1`. See [`flatten_json_value::flatten::Flattener`] for the naming rules,
//! [`tabulate`] for how rows with differing keys are aligned, and [`nested_csv::write`] for csv output.

pub mod flatten_json_value;
pub mod nested_csv;
pub mod tabulate;

pub use {
    flatten_json_value::{FlatRow, FlattenOptions, KeyCollision, Scalar, flatten::Flattener},
    nested_csv::write::{Conversion, CsvWriterWriteTableExt, json_stream_to_csv, json_to_csv},
    tabulate::{RowSet, Table, tabulate, tabulate_document, tabulate_documents},
};
