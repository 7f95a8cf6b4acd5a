/// A named feature firing on one token, with its value.
///
/// Indicator features use a value of `1.0`; real-valued features scale the
/// weights they touch. This is the input type for both training and tagging:
/// one token is a slice of attributes, one sequence a slice of tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Feature name, looked up in the model's feature alphabet
    pub name: String,
    /// Value of the feature
    pub value: f64,
}

impl Attribute {
    pub fn new<T: Into<String>>(name: T, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// An indicator feature (value `1.0`).
    pub fn indicator<T: Into<String>>(name: T) -> Self {
        Self::new(name, 1.0)
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self::indicator(name)
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self::indicator(name)
    }
}

impl<S: Into<String>> From<(S, f64)> for Attribute {
    fn from((name, value): (S, f64)) -> Self {
        Self::new(name, value)
    }
}

/// Build a token from indicator feature names.
pub fn token<I, S>(names: I) -> Vec<Attribute>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Attribute::indicator).collect()
}
