use std::collections::HashMap;
use std::fmt;
use std::slice::Iter as SliceIter;

/// A header field with one or more values
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct Header {
    /// The name of this header
    pub name: String,
    values: Vec<String>,
}

impl Header {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Header {
        Header {
            name: name.into(),
            values,
        }
    }

    /// Get the values stored for this header, in the order they were given.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Get the first value of this header.
    pub fn get_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}: {}", self.name, self.values.join(", "))
    }
}

/// A collection of Headers, iterated in insertion order.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct HeaderMap {
    ordered_headers: Vec<Header>,
    // Position of each header within `ordered_headers`.
    index: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Sets the values of the header `name`.
    ///
    /// A header that is already present keeps its position and has its
    /// values replaced; a new one is appended.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => self.ordered_headers[i].values = values,
            None => {
                self.index.insert(name.clone(), self.ordered_headers.len());
                self.ordered_headers.push(Header::new(name, values));
            }
        }
    }

    /// Get an Iterator over the collection of headers.
    pub fn iter(&self) -> SliceIter<'_, Header> {
        self.ordered_headers.iter()
    }

    /// Get the header called `name`
    pub fn get(&self, name: &str) -> Option<&Header> {
        self.index.get(name).map(|&i| &self.ordered_headers[i])
    }

    /// Returns true if a header called `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the number of headers within this map.
    pub fn len(&self) -> usize {
        self.ordered_headers.len()
    }

    /// Returns true if there are no headers in this map.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
