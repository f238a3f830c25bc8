//! Service registrar: validates an endpoint table and merges it into a transport.

use std::collections::HashSet;

use tracing::info;

use crate::adapter::{adapt_method, AdaptError, WrappedHandler};
use crate::endpoint::EndpointTable;
use crate::method::{Method, UnsupportedMethodError};

/// Registration contract offered by the HTTP transport.
///
/// The transport owns routing and serving; the registrar only tells it which
/// wrapped handler answers which `(path, method)` pair.
pub trait EndpointRegistry {
    /// Registers `handler` under `name` for `method` requests to `path`.
    ///
    /// # Errors
    ///
    /// Implementations fail when `path` or `name` is malformed, or when they
    /// no longer accept registrations.
    fn register(
        &mut self,
        path: &str,
        name: &str,
        handler: WrappedHandler,
        method: Method,
    ) -> anyhow::Result<()>;
}

/// Startup-time registration failures. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("endpoint {name:?} declares {count} methods, exactly one is supported")]
    MethodCount { name: String, count: usize },
    #[error("endpoint {name:?}: {source}")]
    UnsupportedMethod {
        name: String,
        #[source]
        source: UnsupportedMethodError,
    },
    #[error("endpoint {name:?}: {source}")]
    Adapt {
        name: String,
        #[source]
        source: AdaptError,
    },
    #[error("endpoint name {name:?} is declared more than once")]
    DuplicateName { name: String },
    #[error("{method} {path} is declared by both {first:?} and {second:?}")]
    DuplicateEndpoint {
        path: String,
        method: Method,
        first: String,
        second: String,
    },
    #[error("transport rejected endpoint {name:?}: {source}")]
    Transport {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistrationError {
    /// Whether this error reports a verb outside GET/POST/PATCH/PUT.
    #[must_use]
    pub fn is_unsupported_method(&self) -> bool {
        matches!(
            self,
            RegistrationError::UnsupportedMethod { .. }
                | RegistrationError::Adapt {
                    source: AdaptError::UnsupportedMethod(_),
                    ..
                }
        )
    }
}

struct Prepared<'a> {
    name: &'a str,
    path: &'a str,
    method: Method,
    handler: WrappedHandler,
}

/// Validates every entry of `table`, then registers each with `registry`.
///
/// Methods, arities, names and `(path, method)` pairs are validated for the
/// whole table before the first `register` call; a table failing that
/// validation leaves the transport untouched. Path shape is the transport's
/// call: if it rejects an entry, the entries before it stay registered and
/// registration stops there. Returns the number of endpoints registered.
///
/// # Errors
///
/// Returns the first [`RegistrationError`] found, in table order.
pub fn register_all(
    table: &EndpointTable,
    registry: &mut dyn EndpointRegistry,
) -> Result<usize, RegistrationError> {
    let prepared = prepare(table)?;
    let count = prepared.len();

    for entry in prepared {
        registry
            .register(entry.path, entry.name, entry.handler, entry.method)
            .map_err(|source| RegistrationError::Transport {
                name: entry.name.to_string(),
                source,
            })?;
        info!(name = entry.name, method = %entry.method, path = entry.path, "registered endpoint");
    }

    Ok(count)
}

fn prepare(table: &EndpointTable) -> Result<Vec<Prepared<'_>>, RegistrationError> {
    let mut names = HashSet::new();
    let mut routes: Vec<(&str, Method, &str)> = Vec::new();
    let mut prepared = Vec::with_capacity(table.len());

    for spec in table {
        let [declared] = spec.methods.as_slice() else {
            return Err(RegistrationError::MethodCount {
                name: spec.name.clone(),
                count: spec.methods.len(),
            });
        };
        let method: Method =
            declared
                .parse()
                .map_err(|source| RegistrationError::UnsupportedMethod {
                    name: spec.name.clone(),
                    source,
                })?;
        let handler =
            adapt_method(&spec.handler, method).map_err(|source| RegistrationError::Adapt {
                name: spec.name.clone(),
                source,
            })?;

        if !names.insert(spec.name.as_str()) {
            return Err(RegistrationError::DuplicateName {
                name: spec.name.clone(),
            });
        }
        if let Some((_, _, first)) = routes
            .iter()
            .find(|(path, m, _)| *path == spec.path && *m == method)
        {
            return Err(RegistrationError::DuplicateEndpoint {
                path: spec.path.clone(),
                method,
                first: (*first).to_string(),
                second: spec.name.clone(),
            });
        }
        routes.push((spec.path.as_str(), method, spec.name.as_str()));

        prepared.push(Prepared {
            name: &spec.name,
            path: &spec.path,
            method,
            handler,
        });
    }

    Ok(prepared)
}
