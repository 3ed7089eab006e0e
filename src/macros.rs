/// Implements [`RpcFunction::name`](crate::RpcFunction::name).
#[macro_export]
macro_rules! name {
    ($name:expr) => {
        fn name(&self) -> &str {
            $name
        }
    };
}

/// Implements [`RpcFunction::call`](crate::RpcFunction::call) together with
/// its `Domain` and `Range` types from an `async fn`-like body.
#[macro_export]
macro_rules! call {
    (async fn call(& $self:ident, $domain:tt : $domain_ty:ty) -> $range_ty:ty { $($body:tt)* }) => {
        type Domain = $domain_ty;
        type Range = $range_ty;

        fn call(
            & $self,
            $domain: $domain_ty,
        ) -> $crate::BoxFuture<'_, ::std::result::Result<Self::Range, $crate::HandlerError>> {
            let body = async move {
                $($body)*
            };
            Box::pin(body)
        }
    };
}

/// Builds [`Params`](crate::Params): positional arguments first, then
/// optional `name = value` keyword arguments after a `;`.
///
/// ```
/// let params = jrpc::params![2, "three"; scale = 10];
/// assert_eq!(params.args.len(), 2);
/// assert_eq!(params.kwargs["scale"], 10);
/// ```
#[macro_export]
macro_rules! params {
    ($($arg:expr),* $(,)? $(; $($key:ident = $value:expr),* $(,)?)?) => {{
        #[allow(unused_mut)]
        let mut params = $crate::Params::positional(vec![$($crate::json!($arg)),*]);
        $($(
            params.kwargs.insert(stringify!($key).to_owned(), $crate::json!($value));
        )*)?
        params
    }};
}

/// Implements [`Exposed`](crate::Exposed) for a type from a list of its
/// methods. Each method must look like
/// `async fn name(&self, params: Params) -> Result<impl Serialize, HandlerError>`.
///
/// ```
/// use jrpc::{exposed, HandlerError, Params};
///
/// struct Calculator;
///
/// impl Calculator {
///     async fn do_add(&self, params: Params) -> Result<i64, HandlerError> {
///         Ok(params.arg::<i64>(0)? + params.arg::<i64>(1)?)
///     }
/// }
///
/// exposed!(Calculator { do_add });
/// ```
#[macro_export]
macro_rules! exposed {
    ($ty:ty { $($method:ident),* $(,)? }) => {
        impl $crate::Exposed for $ty {
            fn attributes() -> ::std::vec::Vec<$crate::Attribute<Self>> {
                vec![$(
                    $crate::Attribute::new(
                        stringify!($method),
                        |this: ::std::sync::Arc<Self>, params: $crate::Params| {
                            Box::pin(async move {
                                $crate::dispatcher::encode_result(this.$method(params).await)
                            })
                        },
                    )
                ),*]
            }
        }
    };
}
