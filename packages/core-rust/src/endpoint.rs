//! Declarative endpoint tables.

use crate::adapter::Handler;

/// One named endpoint: declared verbs, path, and handler.
///
/// Verbs are kept exactly as declared and validated only when the table is
/// registered, so a bad declaration fails startup instead of construction.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    /// Unique name within the owning service.
    pub name: String,
    /// Declared HTTP verbs. Exactly one is supported.
    pub methods: Vec<String>,
    /// Route path, e.g. `/` or `/async_test`.
    pub path: String,
    /// Business logic for the endpoint.
    pub handler: Handler,
}

impl EndpointSpec {
    pub fn new<I, M>(name: impl Into<String>, methods: I, path: impl Into<String>, handler: Handler) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        Self {
            name: name.into(),
            methods: methods.into_iter().map(Into::into).collect(),
            path: path.into(),
            handler,
        }
    }

    /// Shorthand for a single-verb `GET` endpoint.
    pub fn get(name: impl Into<String>, path: impl Into<String>, handler: Handler) -> Self {
        Self::new(name, ["GET"], path, handler)
    }
}

/// Ordered collection of a service's endpoints.
///
/// Built once by the service and read once by the registrar.
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    entries: Vec<EndpointSpec>,
}

impl EndpointTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `spec` and returns the table, for builder-style construction.
    #[must_use]
    pub fn with(mut self, spec: EndpointSpec) -> Self {
        self.entries.push(spec);
        self
    }

    pub fn push(&mut self, spec: EndpointSpec) {
        self.entries.push(spec);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointSpec> {
        self.entries.iter()
    }

    /// Looks up an endpoint by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EndpointSpec> {
        self.entries.iter().find(|spec| spec.name == name)
    }
}

impl<'a> IntoIterator for &'a EndpointTable {
    type Item = &'a EndpointSpec;
    type IntoIter = std::slice::Iter<'a, EndpointSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Capability implemented by every concrete service: declare its endpoints.
pub trait EndpointSource {
    /// Returns the service's endpoint table.
    fn endpoints(&self) -> EndpointTable;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Reply;

    fn noop() -> Handler {
        Handler::sync_query(|_| Ok(Reply::text(200, "")))
    }

    #[test]
    fn builder_preserves_insertion_order() {
        let table = EndpointTable::new()
            .with(EndpointSpec::get("b", "/b", noop()))
            .with(EndpointSpec::get("a", "/a", noop()));

        let names: Vec<_> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn get_shorthand_declares_single_get() {
        let spec = EndpointSpec::get("homepage", "/", noop());
        assert_eq!(spec.methods, vec!["GET"]);
        assert_eq!(spec.path, "/");
    }

    #[test]
    fn lookup_by_name() {
        let mut table = EndpointTable::new();
        assert!(table.is_empty());
        table.push(EndpointSpec::new("submit", ["POST"], "/submit", Handler::sync_body(|_, _| {
            Ok(Reply::text(201, ""))
        })));

        assert_eq!(table.get("submit").map(|s| s.methods.clone()), Some(vec!["POST".to_string()]));
        assert!(table.get("missing").is_none());
    }
}
