use {
    crate::{
        flatten_json_value::{FlattenOptions, KeyCollision, flatten::Flattener},
        tabulate::{self, RowSet, Table, tabulate_document, tabulate_documents},
    },
    itertools::Itertools,
    serde_json::Value,
    std::io::{Read, Write},
    tap::Pipe,
    tracing::instrument,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not parse the json input")]
    Parsing(#[source] serde_json::Error),
    #[error("Could not tabulate the json input")]
    Tabulating(#[from] tabulate::Error),
    #[error("Could not write headers")]
    WritingHeaders(#[source] csv::Error),
    #[error("Writing record #{idx}")]
    WritingRecord {
        idx: usize,
        #[source]
        source: csv::Error,
    },
    #[error("Record #{idx} has {found} cells but the header has {expected}")]
    RaggedRecord {
        idx: usize,
        found: usize,
        expected: usize,
    },
    #[error("Flushing the csv writer")]
    Flushing(#[source] std::io::Error),
}

type Result<T> = std::result::Result<T, self::Error>;

/// Outcome of one json to csv conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversion {
    pub rows: usize,
    pub columns: usize,
    /// Key collisions, with the index of the row they occurred in.
    pub collisions: Vec<(usize, KeyCollision)>,
}

#[extension_traits::extension(pub trait CsvWriterWriteTableExt)]
impl<W: Write> csv::Writer<W> {
    /// Writes the header followed by every row, returning the number of rows in `table`.
    /// Rows are checked against the header before anything is written. A table without
    /// columns has no csv text, so nothing is written for it.
    fn write_table(&mut self, table: &Table) -> Result<usize> {
        if let Some((idx, row)) = table
            .rows
            .iter()
            .find_position(|row| row.len() != table.columns.len())
        {
            return Err(self::Error::RaggedRecord {
                idx,
                found: row.len(),
                expected: table.columns.len(),
            });
        }
        if table.columns.is_empty() {
            return Ok(table.rows.len());
        }
        self.write_record(&table.columns)
            .map_err(self::Error::WritingHeaders)?;
        table
            .rows
            .iter()
            .enumerate()
            .try_for_each(|(idx, row)| {
                self.write_record(row.iter().map(|cell| cell.render().into_owned()))
                    .map_err(|source| self::Error::WritingRecord { idx, source })
            })
            .map(|()| table.rows.len())
    }
}

/// Writes `rows` as csv and reports what was written.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn write_row_set<W: Write>(writer: &mut csv::Writer<W>, rows: &RowSet) -> Result<Conversion> {
    let table = rows.to_table();
    writer
        .write_table(&table)
        .and_then(|written| writer.flush().map_err(self::Error::Flushing).map(|()| written))
        .map(|written| Conversion {
            rows: written,
            columns: table.columns.len(),
            collisions: rows.collisions().map(|(idx, c)| (idx, c.clone())).collect(),
        })
        .inspect(|conversion| {
            tracing::debug!(
                columns = conversion.columns,
                collisions = conversion.collisions.len(),
                "wrote csv"
            )
        })
}

/// Converts one json document: an object becomes a single row, an array of objects one row per element.
#[instrument(skip_all)]
pub fn json_to_csv<R: Read, W: Write>(reader: R, writer: W, options: &FlattenOptions) -> Result<Conversion> {
    serde_json::from_reader::<_, Value>(reader)
        .map_err(self::Error::Parsing)
        .and_then(|document| {
            tabulate_document(&Flattener::new(options.clone()), &document).map_err(self::Error::from)
        })
        .and_then(|rows| csv::Writer::from_writer(writer).pipe_ref_mut(|w| write_row_set(w, &rows)))
}

/// Converts a whitespace separated stream of json objects, for example newline delimited json.
#[instrument(skip_all)]
pub fn json_stream_to_csv<R: Read, W: Write>(
    reader: R,
    writer: W,
    options: &FlattenOptions,
) -> Result<Conversion> {
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<Value>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(self::Error::Parsing)
        .and_then(|documents| {
            tabulate_documents(&Flattener::new(options.clone()), &documents).map_err(self::Error::from)
        })
        .and_then(|rows| csv::Writer::from_writer(writer).pipe_ref_mut(|w| write_row_set(w, &rows)))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::flatten_json_value::Scalar,
        anyhow::Context,
        std::io::Cursor,
    };

    fn convert(input: &str, options: &FlattenOptions) -> anyhow::Result<(Conversion, Vec<String>)> {
        let mut out = Vec::new();
        json_to_csv(Cursor::new(input), &mut out, options)
            .context("converting")
            .and_then(|conversion| {
                String::from_utf8(out)
                    .context("csv output is utf-8")
                    .map(|text| (conversion, text.lines().map(str::to_string).collect()))
            })
    }

    #[test_log::test]
    fn test_array_of_objects() -> anyhow::Result<()> {
        let (conversion, lines) = convert(
            r#"[{"type":"Point","coordinates":[-99.9,16.88333]},{"type":"Line","extra":"x"}]"#,
            &FlattenOptions::default(),
        )?;

        assert_eq!(
            lines,
            [
                "coordinates_0,coordinates_1,extra,type",
                "-99.9,16.88333,,Point",
                ",,x,Line",
            ]
        );
        assert_eq!(conversion.rows, 2);
        assert_eq!(conversion.columns, 4);
        assert!(conversion.collisions.is_empty());
        Ok(())
    }

    #[test_log::test]
    fn test_single_object_keeps_key_order() -> anyhow::Result<()> {
        let (_, lines) = convert(
            r#"{"name":"a, b","geo":{"lat":1.5,"lon":null},"ok":false}"#,
            &FlattenOptions::default(),
        )?;
        assert_eq!(lines, ["name,geo_lat,geo_lon,ok", r#""a, b",1.5,,false"#]);
        Ok(())
    }

    #[test]
    fn test_empty_array_writes_nothing() -> anyhow::Result<()> {
        let (conversion, lines) = convert("[]", &FlattenOptions::default())?;
        assert_eq!(conversion, Conversion::default());
        assert!(lines.is_empty());
        Ok(())
    }

    #[test]
    fn test_errors() {
        let mut out = Vec::new();
        assert!(matches!(
            json_to_csv(Cursor::new("{\"a\":"), &mut out, &FlattenOptions::default()),
            Err(Error::Parsing(_))
        ));
        assert!(matches!(
            json_to_csv(Cursor::new("[1]"), &mut out, &FlattenOptions::default()),
            Err(Error::Tabulating(tabulate::Error::MalformedInput {
                index: Some(0),
                found: "Value::Number"
            }))
        ));
        assert!(matches!(
            json_to_csv(
                Cursor::new(r#"{"a":{"b":{}}}"#),
                &mut out,
                &FlattenOptions::default().with_max_depth(2)
            ),
            Err(Error::Tabulating(tabulate::Error::Flatten { index: None, .. }))
        ));
        assert!(out.is_empty());
    }

    #[test_log::test]
    fn test_stream() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let conversion = json_stream_to_csv(
            Cursor::new("{\"b\":1,\"a\":{\"b\":2}}\n{\"c\":[\"x\"]}\n"),
            &mut out,
            &FlattenOptions::default().with_separator("."),
        )?;

        assert_eq!(conversion.rows, 2);
        assert_eq!(String::from_utf8(out)?.lines().collect::<Vec<_>>(), ["a.b,b,c.0", "2,1,", ",,x"]);
        Ok(())
    }

    #[test_log::test]
    fn test_collisions_are_reported() -> anyhow::Result<()> {
        let (conversion, lines) = convert(r#"[{"a_b":1,"a":{"b":2}}]"#, &FlattenOptions::default())?;
        assert_eq!(lines, ["a_b", "2"]);
        assert_eq!(conversion.collisions.len(), 1);
        assert_eq!(conversion.collisions[0].0, 0);
        assert_eq!(conversion.collisions[0].1.discarded, Scalar::try_from(serde_json::json!(1)).unwrap());
        Ok(())
    }

    #[test]
    fn test_ragged_table_is_rejected() {
        let table = Table {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Scalar::Null]],
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        assert!(matches!(
            writer.write_table(&table),
            Err(Error::RaggedRecord { idx: 0, found: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_ragged_table_leaves_no_partial_output() -> anyhow::Result<()> {
        let table = Table {
            columns: vec!["a".into()],
            rows: vec![vec![Scalar::Null], vec![Scalar::Bool(true)], vec![]],
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        assert!(matches!(
            writer.write_table(&table),
            Err(Error::RaggedRecord { idx: 2, found: 0, expected: 1 })
        ));
        let buffer = writer.into_inner().context("dropping writer")?;
        assert!(buffer.is_empty(), "{:?}", String::from_utf8_lossy(&buffer));
        Ok(())
    }

    #[test]
    fn test_column_less_rows_are_counted() -> anyhow::Result<()> {
        let (conversion, lines) = convert("[{}, {\"a\": {}}]", &FlattenOptions::default())?;
        assert_eq!(conversion.rows, 2);
        assert_eq!(conversion.columns, 0);
        assert!(lines.is_empty());
        Ok(())
    }

    #[test_log::test]
    fn test_numbers_keep_their_source_text() -> anyhow::Result<()> {
        let (_, lines) = convert(
            r#"{"id":123456789012345678901234,"huge":1e400,"small":-0.000001,"n":-7}"#,
            &FlattenOptions::default(),
        )?;
        assert_eq!(lines, ["id,huge,small,n", "123456789012345678901234,1e400,-0.000001,-7"]);
        Ok(())
    }
}
