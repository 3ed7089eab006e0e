use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Arguments of one method call: positional `args` and keyword `kwargs`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl Params {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Decode the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgumentError> {
        let value = self.args.get(index).ok_or(ArgumentError::Arity {
            expected: index + 1,
            got: self.args.len(),
        })?;
        decode(value.clone(), || format!("argument {index}"))
    }

    /// Decode the keyword argument `name`, `None` when the caller left it out.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ArgumentError> {
        self.kwargs
            .get(name)
            .map(|value| decode(value.clone(), || format!("keyword `{name}`")))
            .transpose()
    }

    /// Like [`Params::kwarg`] but the keyword must be present.
    pub fn require_kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgumentError> {
        self.kwarg(name)?
            .ok_or_else(|| ArgumentError::MissingKeyword(name.to_owned()))
    }
}

impl From<Vec<Value>> for Params {
    fn from(args: Vec<Value>) -> Self {
        Self::positional(args)
    }
}

fn decode<T: DeserializeOwned>(
    value: Value,
    position: impl FnOnce() -> String,
) -> Result<T, ArgumentError> {
    serde_json::from_value(value).map_err(|source| ArgumentError::Mismatch {
        position: position(),
        source,
    })
}

/// Conversion from raw call arguments into the typed domain of a handler.
pub trait FromParams: Sized {
    fn from_params(params: Params) -> Result<Self, ArgumentError>;
}

impl FromParams for Params {
    fn from_params(params: Params) -> Result<Self, ArgumentError> {
        Ok(params)
    }
}

impl FromParams for () {
    fn from_params(params: Params) -> Result<Self, ArgumentError> {
        expect_arity(&params, 0)
    }
}

fn expect_arity(params: &Params, expected: usize) -> Result<(), ArgumentError> {
    if params.args.len() == expected {
        Ok(())
    } else {
        Err(ArgumentError::Arity {
            expected,
            got: params.args.len(),
        })
    }
}

macro_rules! impl_from_params {
    ($len:expr => $($name:ident : $idx:tt),+) => {
        impl<$($name),+> FromParams for ($($name,)+)
        where
            $($name: DeserializeOwned),+
        {
            fn from_params(params: Params) -> Result<Self, ArgumentError> {
                expect_arity(&params, $len)?;
                Ok(($(params.arg::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_params!(1 => A: 0);
impl_from_params!(2 => A: 0, B: 1);
impl_from_params!(3 => A: 0, B: 1, C: 2);
impl_from_params!(4 => A: 0, B: 1, C: 2, D: 3);

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("expected {expected} positional argument(s), got {got}")]
    Arity { expected: usize, got: usize },

    #[error("{position} has the wrong type: {source}")]
    Mismatch {
        position: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing keyword argument `{0}`")]
    MissingKeyword(String),
}
