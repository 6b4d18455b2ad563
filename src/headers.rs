use std::fmt;
use std::slice;

/// An ordered multimap of HTTP headers.
///
/// Lookup is case-insensitive, iteration preserves insertion order, and
/// a name may appear any number of times. Values are kept as the exact
/// strings that will go on (or came off) the wire.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    items: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { items: Vec::new() }
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn add<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>
    {
        self.items.push((name.into(), value.into()));
    }

    /// Replace all values of `name` with a single value.
    ///
    /// The new value takes the position of the first old one, or is
    /// appended if the name was absent.
    pub fn set<V: Into<String>>(&mut self, name: &str, value: V) {
        let pos = self.items.iter()
            .position(|&(ref n, _)| n.eq_ignore_ascii_case(name));
        self.items.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
        let at = pos.unwrap_or(self.items.len());
        self.items.insert(at, (name.to_string(), value.into()));
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    /// All values of `name`, in insertion order.
    pub fn all<'a>(&'a self, name: &'a str)
        -> impl Iterator<Item=&'a str> + 'a
    {
        self.items.iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|&(ref n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, name: &str) {
        self.items.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> Iter {
        Iter(self.items.iter())
    }

    /// True if any value of `name` contains `token` in its
    /// comma-separated list (compared case-insensitively, surrounding
    /// whitespace ignored). This is how list-typed headers such as
    /// `Connection: keep-alive, Upgrade` are tested.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.all(name).any(|value| {
            value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Iterator over `(name, value)` pairs in insertion order.
pub struct Iter<'a>(slice::Iter<'a, (String, String)>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);
    fn next(&mut self) -> Option<(&'a str, &'a str)> {
        self.0.next().map(|&(ref n, ref v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}
