use {
    indexmap::IndexMap,
    itertools::Itertools,
    serde_json::{Number, Value},
    std::{borrow::Cow, fmt},
    tap::{Pipe, Tap},
};

/// Default separator placed between the segments of a flattened key.
pub const JOIN_TAG: &str = "_";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment<'a> {
    Idx(usize),
    Field(Cow<'a, str>),
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Idx(idx) => write!(f, "{idx}"),
            Segment::Field(cow) => f.write_str(cow),
        }
    }
}

/// Location of a node inside a document, counted from the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath<'a>(Vec<Segment<'a>>);

impl<'a> FieldPath<'a> {
    pub fn join(&self, segment: Segment<'a>) -> Self {
        self.clone().tap_mut(|p| p.0.push(segment))
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.0
    }

    /// Column name for this path: `prefix` followed by every segment joined with `separator`.
    pub fn flat_key(&self, prefix: &str, separator: &str) -> String {
        self.0
            .iter()
            .join(separator)
            .pipe(|joined| format!("{prefix}{joined}"))
    }
}

/// Renders as `$.user.tags[0]`, which stays unambiguous even when keys contain the separator.
impl fmt::Display for FieldPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        self.0.iter().try_for_each(|segment| match segment {
            Segment::Idx(idx) => write!(f, "[{idx}]"),
            Segment::Field(key) => write!(f, ".{key}"),
        })
    }
}

/// A leaf value. Arrays and objects never survive flattening, so they have no variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    /// The marker written into cells whose column is absent from a row.
    pub fn empty() -> Self {
        Scalar::String(String::new())
    }

    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Scalar::Null => Cow::Borrowed(""),
            Scalar::Bool(bool) => bool.to_string().pipe(Cow::Owned),
            Scalar::Number(number) => number.to_string().pipe(Cow::Owned),
            Scalar::String(v) => Cow::Borrowed(v),
        }
    }
}

impl TryFrom<Value> for Scalar {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Scalar::Null),
            Value::Bool(bool) => Ok(Scalar::Bool(bool)),
            Value::Number(number) => Ok(Scalar::Number(number)),
            Value::String(v) => Ok(Scalar::String(v)),
            other @ (Value::Array(_) | Value::Object(_)) => Err(other),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(bool) => Value::Bool(bool),
            Scalar::Number(number) => Value::Number(number),
            Scalar::String(v) => Value::String(v),
        }
    }
}

/// Two branches of a document produced the same flattened key.
/// The later value was kept, `discarded` holds the one it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCollision {
    pub key: String,
    pub path: String,
    pub discarded: Scalar,
}

/// Flattened form of one document: column name to scalar, in traversal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    values: IndexMap<String, Scalar>,
    collisions: Vec<KeyCollision>,
}

impl FlatRow {
    /// Last write wins. Overwritten values are kept as [`KeyCollision`]s.
    pub fn insert(&mut self, key: String, value: Scalar, path: &FieldPath<'_>) {
        if let Some(discarded) = self.values.insert(key.clone(), value) {
            tracing::warn!(%key, %path, "flattened key collision, keeping the last value");
            self.collisions.push(KeyCollision {
                key,
                path: path.to_string(),
                discarded,
            });
        }
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn collisions(&self) -> &[KeyCollision] {
        &self.collisions
    }

    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect()
    }
}

impl FromIterator<(String, Scalar)> for FlatRow {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(FlatRow::default(), |mut row, (key, value)| {
                row.insert(key.clone(), value, &FieldPath::default().join(Segment::Field(Cow::Owned(key))));
                row
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenOptions {
    pub separator: String,
    /// Maximum number of nested containers, the root container counting as one. `None` is unbounded.
    pub max_depth: Option<usize>,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            separator: JOIN_TAG.to_string(),
            max_depth: None,
        }
    }
}

impl FlattenOptions {
    pub fn with_separator(self, separator: impl Into<String>) -> Self {
        self.tap_mut(|o| o.separator = separator.into())
    }

    pub fn with_max_depth(self, max_depth: usize) -> Self {
        self.tap_mut(|o| o.max_depth = Some(max_depth))
    }
}

pub mod flatten;

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn test_flat_key_joins_segments() {
        let path = FieldPath::default()
            .join(Segment::Field("coordinates".into()))
            .join(Segment::Idx(1));
        assert_eq!(path.flat_key("", JOIN_TAG), "coordinates_1");
        assert_eq!(path.flat_key("geo_", "."), "geo_coordinates.1");
        assert_eq!(FieldPath::default().flat_key("pfx", JOIN_TAG), "pfx");
    }

    #[test]
    fn test_path_display() {
        let path = FieldPath::default()
            .join(Segment::Field("a_b".into()))
            .join(Segment::Idx(0))
            .join(Segment::Field("c".into()));
        assert_eq!(path.to_string(), "$.a_b[0].c");
        assert_eq!(FieldPath::default().to_string(), "$");
    }

    #[test]
    fn test_scalar_rendering() {
        assert_eq!(Scalar::Null.render(), "");
        assert_eq!(Scalar::Bool(true).render(), "true");
        assert_eq!(Scalar::try_from(json!(-99.9)).unwrap().render(), "-99.9");
        assert_eq!(Scalar::String("x,y".into()).render(), "x,y");
        assert_eq!(Scalar::empty().render(), "");
    }

    #[test]
    fn test_containers_are_not_scalars() {
        assert_eq!(Scalar::try_from(json!([1])), Err(json!([1])));
        assert_eq!(Scalar::try_from(json!({"a": 1})), Err(json!({"a": 1})));
    }

    #[test_log::test]
    fn test_insert_records_collisions() {
        let row = [
            ("a".to_string(), Scalar::Bool(false)),
            ("b".to_string(), Scalar::Null),
            ("a".to_string(), Scalar::Bool(true)),
        ]
        .into_iter()
        .collect::<FlatRow>();

        assert_eq!(row.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(row.get("a"), Some(&Scalar::Bool(true)));
        assert_eq!(
            row.collisions(),
            [KeyCollision {
                key: "a".into(),
                path: "$.a".into(),
                discarded: Scalar::Bool(false),
            }]
        );
    }
}
