use std::io::Read;
use std::str::FromStr;

use url::form_urlencoded;

use crate::body::BodyReader;
use crate::enums::{Method, Version};
use crate::error::Error;
use crate::headers::Headers;

/// Query parameters decoded from the request target.
///
/// A multimap like `Headers`, except names are case-sensitive (query
/// strings are user data, not protocol vocabulary).
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    items: Vec<(String, String)>,
}

impl QueryParams {
    pub(crate) fn parse(raw: &str) -> QueryParams {
        QueryParams {
            items: form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub(crate) fn empty() -> QueryParams {
        QueryParams { items: Vec::new() }
    }

    /// First value of `name`, if present.
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.items.iter()
            .find(|&&(ref n, _)| n == name)
            .map(|&(_, ref v)| v.as_str())
    }

    /// All values of `name`, in the order they appear in the query.
    pub fn all<'a>(&'a self, name: &'a str)
        -> impl Iterator<Item=&'a str> + 'a
    {
        self.items.iter()
            .filter(move |&&(ref n, _)| n == name)
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &str)> {
        self.items.iter().map(|&(ref n, ref v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parameters captured by the router from the request path.
///
/// Populated once when a route matches; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    items: Vec<(String, String)>,
}

impl PathParams {
    pub(crate) fn new() -> PathParams {
        PathParams { items: Vec::new() }
    }

    pub(crate) fn insert(&mut self, name: &str, value: &str) {
        self.items.push((name.to_string(), value.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.iter()
            .find(|&&(ref n, _)| n == name)
            .map(|&(_, ref v)| v.as_str())
    }

    /// A captured parameter parsed into a typed form.
    ///
    /// Returns `None` both when the parameter is absent and when it
    /// does not parse as `T`. Typed captures (`:name:uint` and
    /// friends) are validated during matching, so for them the parse
    /// here cannot fail.
    pub fn get_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A single parsed HTTP request.
///
/// The head is fully parsed; the body is a lazy stream that the
/// handler may consume at most once.
pub struct Request {
    method: Method,
    path: String,
    raw_query: Option<String>,
    version: Version,
    headers: Headers,
    query: QueryParams,
    path_params: PathParams,
    body: BodyReader,
}

impl Request {
    pub(crate) fn new(method: Method, path: String,
        raw_query: Option<String>, version: Version, headers: Headers,
        body: BodyReader)
        -> Request
    {
        let query = match raw_query {
            Some(ref q) => QueryParams::parse(q),
            None => QueryParams::empty(),
        };
        Request {
            method: method,
            path: path,
            raw_query: raw_query,
            version: version,
            headers: headers,
            query: query,
            path_params: PathParams::new(),
            body: body,
        }
    }

    /// Start building a request by hand. Meant for handler tests.
    pub fn build<M: Into<Method>>(method: M, path: &str)
        -> RequestBuilder
    {
        RequestBuilder {
            method: method.into(),
            path: path.to_string(),
            raw_query: None,
            version: Version::Http11,
            headers: Headers::new(),
            body: BodyReader::empty(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path portion of the request target, e.g. `/users/42`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string as sent, without the leading `?`.
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_ref().map(|s| s.as_str())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub(crate) fn path_params_mut(&mut self) -> &mut PathParams {
        &mut self.path_params
    }

    /// The body stream. Consumable at most once.
    pub fn body(&mut self) -> &mut BodyReader {
        &mut self.body
    }

    /// Read the whole body into memory, refusing to buffer more than
    /// `limit` bytes.
    pub fn read_body_to_vec(&mut self, limit: usize)
        -> Result<Vec<u8>, Error>
    {
        if let Some(size) = self.body.size_hint() {
            if size > limit as u64 {
                return Err(Error::PayloadTooLarge);
            }
        }
        let mut data = Vec::new();
        let body = &mut self.body;
        body.take(limit as u64 + 1).read_to_end(&mut data)?;
        if data.len() > limit {
            return Err(Error::PayloadTooLarge);
        }
        Ok(data)
    }

    pub(crate) fn take_buffered(&mut self) -> Vec<u8> {
        self.body.take_buffered()
    }
}

/// Builds a `Request` without a socket behind it.
pub struct RequestBuilder {
    method: Method,
    path: String,
    raw_query: Option<String>,
    version: Version,
    headers: Headers,
    body: BodyReader,
}

impl RequestBuilder {
    pub fn query(mut self, raw: &str) -> Self {
        self.raw_query = Some(raw.to_string());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn body(mut self, data: &[u8]) -> Self {
        self.body = BodyReader::from_bytes(data);
        self
    }

    pub fn done(self) -> Request {
        Request::new(self.method, self.path, self.raw_query,
            self.version, self.headers, self.body)
    }
}

#[cfg(test)]
mod test {
    use crate::enums::Method;
    use super::Request;

    #[test]
    fn builder_basics() {
        let mut req = Request::build("GET", "/hello")
            .query("name=world&name=again&x=%2F")
            .header("Host", "localhost")
            .done();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.query().get_first("name"), Some("world"));
        assert_eq!(req.query().all("name").collect::<Vec<_>>(),
            vec!["world", "again"]);
        assert_eq!(req.query().get_first("x"), Some("/"));
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(req.read_body_to_vec(16).unwrap(), b"");
    }

    #[test]
    fn body_limit() {
        let mut req = Request::build("POST", "/upload")
            .body(b"0123456789")
            .done();
        assert_matches!(req.read_body_to_vec(4),
            Err(crate::Error::PayloadTooLarge));
    }

    #[test]
    fn typed_path_params() {
        let mut req = Request::build("GET", "/users/42").done();
        req.path_params_mut().insert("id", "42");
        assert_eq!(req.path_params().get_as::<u64>("id"), Some(42));
        assert_eq!(req.path_params().get_as::<String>("id"),
            Some("42".to_string()));
        assert_eq!(req.path_params().get_as::<u64>("missing"), None);
    }
}
