use {
    super::{FieldPath, FlatRow, FlattenOptions, Scalar, Segment},
    serde::Serialize,
    serde_json::Value,
    std::borrow::Cow,
    tracing::instrument,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("nesting at '{path}' exceeds the maximum depth of {limit}")]
    DepthExceeded { path: String, limit: usize },
    #[error("Could not serialize the value to json")]
    SerializingToValue(#[source] serde_json::Error),
}

type Result<T> = std::result::Result<T, self::Error>;

/// A node waiting to be visited. `depth` counts the containers above it.
struct Pending<'doc> {
    path: FieldPath<'doc>,
    node: &'doc Value,
    depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Flattener {
    options: FlattenOptions,
}

impl Flattener {
    pub fn new(options: FlattenOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FlattenOptions {
        &self.options
    }

    pub fn flatten(&self, node: &Value) -> Result<FlatRow> {
        self.flatten_with_prefix(node, "")
    }

    /// Objects contribute `key`, array elements their index, and leaves are stored under
    /// `prefix` followed by the path segments joined with the separator.
    ///
    /// The traversal keeps its own stack, so document depth is bounded only by
    /// [`FlattenOptions::max_depth`] and never by the native call stack.
    #[instrument(skip(self, node))]
    pub fn flatten_with_prefix(&self, node: &Value, prefix: &str) -> Result<FlatRow> {
        let mut row = FlatRow::default();
        let mut stack = vec![Pending {
            path: FieldPath::default(),
            node,
            depth: 0,
        }];

        // children are pushed in reverse so they pop in document order
        while let Some(Pending { path, node, depth }) = stack.pop() {
            match node {
                Value::Object(map) => {
                    self.enter(&path, depth)?;
                    stack.extend(map.iter().rev().map(|(key, child)| Pending {
                        path: path.join(Segment::Field(Cow::Borrowed(key.as_str()))),
                        node: child,
                        depth: depth + 1,
                    }));
                }
                Value::Array(items) => {
                    self.enter(&path, depth)?;
                    stack.extend(items.iter().enumerate().rev().map(|(idx, child)| Pending {
                        path: path.join(Segment::Idx(idx)),
                        node: child,
                        depth: depth + 1,
                    }));
                }
                Value::Null => self.leaf(&mut row, prefix, &path, Scalar::Null),
                Value::Bool(bool) => self.leaf(&mut row, prefix, &path, Scalar::Bool(*bool)),
                Value::Number(number) => {
                    self.leaf(&mut row, prefix, &path, Scalar::Number(number.clone()))
                }
                Value::String(v) => self.leaf(&mut row, prefix, &path, Scalar::String(v.clone())),
            }
        }

        tracing::debug!(columns = row.len(), collisions = row.collisions().len(), "flattened");
        Ok(row)
    }

    /// Flattens anything serializable by going through its `serde_json` representation.
    #[instrument(skip_all)]
    pub fn flatten_serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<FlatRow> {
        serde_json::to_value(value)
            .map_err(self::Error::SerializingToValue)
            .and_then(|value| self.flatten(&value))
    }

    fn enter(&self, path: &FieldPath<'_>, depth: usize) -> Result<()> {
        match self.options.max_depth {
            Some(limit) if depth >= limit => Err(self::Error::DepthExceeded {
                path: path.to_string(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn leaf(&self, row: &mut FlatRow, prefix: &str, path: &FieldPath<'_>, value: Scalar) {
        row.insert(path.flat_key(prefix, &self.options.separator), value, path);
    }
}
