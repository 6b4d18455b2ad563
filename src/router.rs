use crate::enums::Method;
use crate::error::Error;
use crate::handler::{Handler, HandlerContext};

/// One parsed segment of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Matches exact bytes
    Literal(String),
    /// `:name` or `:name:TYPE`, captures one segment
    Param { name: String, kind: ParamKind },
    /// `*`, matches exactly one segment
    Wildcard,
    /// `**`, matches the rest of the path (trailing only)
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    /// One non-empty segment (`:name` or `:name:string`)
    Str,
    /// Signed decimal (`:name:int`)
    Int,
    /// Unsigned decimal (`:name:uint` / `:name:ulong`)
    Uint,
    /// Canonical 8-4-4-4-12 hex form (`:name:uuid`)
    Uuid,
}

impl Segment {
    // lower ranks are tried first when routes compete
    fn rank(&self) -> u8 {
        match *self {
            Segment::Literal(..) => 0,
            Segment::Param { kind: ParamKind::Str, .. } => 2,
            Segment::Param { .. } => 1,
            Segment::Wildcard => 3,
            Segment::Tail => 4,
        }
    }
}

fn is_canonical_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

impl ParamKind {
    fn accepts(&self, segment: &str) -> bool {
        match *self {
            ParamKind::Str => !segment.is_empty(),
            ParamKind::Int => segment.parse::<i64>().is_ok(),
            ParamKind::Uint => segment.parse::<u64>().is_ok(),
            ParamKind::Uuid => is_canonical_uuid(segment),
        }
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern such as `/users/:id:uint/posts/**`.
    ///
    /// # Panics
    ///
    /// Panics on grammar violations (an unknown capture type, a `**`
    /// that is not the trailing segment, an empty segment). Route
    /// tables are built by the program, not from input, so a bad
    /// pattern is a bug in the caller.
    fn parse(text: &str) -> Pattern {
        let trimmed = text.trim_start_matches('/')
            .trim_end_matches('/');
        let mut segments = Vec::new();
        if trimmed.is_empty() {
            return Pattern { segments: segments };
        }
        let raw: Vec<&str> = trimmed.split('/').collect();
        for (i, part) in raw.iter().enumerate() {
            let seg = match *part {
                "" => panic!("empty segment in path pattern {:?}", text),
                "*" => Segment::Wildcard,
                "**" => {
                    if i + 1 != raw.len() {
                        panic!("`**` is only allowed as the trailing \
                            segment, in {:?}", text);
                    }
                    Segment::Tail
                }
                p if p.starts_with(':') => {
                    let capture = &p[1..];
                    let (name, kind) = match capture.find(':') {
                        Some(at) => {
                            let kind = match &capture[at+1..] {
                                "string" => ParamKind::Str,
                                "int" => ParamKind::Int,
                                "uint" | "ulong" => ParamKind::Uint,
                                "uuid" => ParamKind::Uuid,
                                other => panic!("unknown capture type \
                                    {:?} in path pattern {:?}",
                                    other, text),
                            };
                            (&capture[..at], kind)
                        }
                        None => (capture, ParamKind::Str),
                    };
                    if name.is_empty() {
                        panic!("capture without a name in path \
                            pattern {:?}", text);
                    }
                    Segment::Param {
                        name: name.to_string(),
                        kind: kind,
                    }
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(seg);
        }
        Pattern { segments: segments }
    }

    fn specificity(&self) -> Vec<u8> {
        self.segments.iter().map(|s| s.rank()).collect()
    }

    /// Match against already-split path segments, returning captured
    /// parameters on success.
    fn matches(&self, path: &[&str]) -> Option<Vec<(String, String)>> {
        let mut captures = Vec::new();
        let mut i = 0;
        for seg in &self.segments {
            match *seg {
                Segment::Tail => {
                    // swallows everything that is left, even nothing
                    return Some(captures);
                }
                _ if i >= path.len() => return None,
                Segment::Literal(ref lit) => {
                    if lit != path[i] {
                        return None;
                    }
                }
                Segment::Wildcard => {
                    if path[i].is_empty() {
                        return None;
                    }
                }
                Segment::Param { ref name, ref kind } => {
                    if !kind.accepts(path[i]) {
                        return None;
                    }
                    captures.push((name.clone(), path[i].to_string()));
                }
            }
            i += 1;
        }
        if i == path.len() {
            Some(captures)
        } else {
            None
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Box<dyn Handler>,
}

enum Outcome<'r> {
    Found(&'r dyn Handler, Vec<(String, String)>),
    WrongMethod(Vec<Method>),
    NoMatch,
}

/// Maps `(method, path pattern)` pairs to handlers.
///
/// Routes are tried in decreasing specificity: literal segments beat
/// typed captures, typed captures beat untyped ones, `*` beats `**`.
/// Routes of equal specificity keep their insertion order, so two
/// identical route tables dispatch identically.
///
/// A path with no matching route yields `404 Not Found`; a path whose
/// patterns only match under other methods yields `405 Method Not
/// Allowed` with an `Allow` header. `HEAD` falls back to `GET` routes
/// (with the body suppressed by the response writer).
pub struct PathRouter {
    routes: Vec<Route>,
    order: Vec<usize>,
}

impl PathRouter {
    pub fn new() -> PathRouter {
        PathRouter {
            routes: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Register a handler for a method and path pattern.
    ///
    /// # Panics
    ///
    /// Panics if the pattern violates the grammar (see
    /// `Pattern::parse`).
    pub fn add_route<H>(&mut self, method: Method, pattern: &str,
        handler: H)
        -> &mut Self
        where H: Handler + 'static
    {
        self.routes.push(Route {
            method: method,
            pattern: Pattern::parse(pattern),
            handler: Box::new(handler),
        });
        self.resort();
        self
    }

    pub fn get<H: Handler + 'static>(&mut self, pattern: &str,
        handler: H) -> &mut Self
    {
        self.add_route(Method::Get, pattern, handler)
    }

    pub fn post<H: Handler + 'static>(&mut self, pattern: &str,
        handler: H) -> &mut Self
    {
        self.add_route(Method::Post, pattern, handler)
    }

    pub fn put<H: Handler + 'static>(&mut self, pattern: &str,
        handler: H) -> &mut Self
    {
        self.add_route(Method::Put, pattern, handler)
    }

    pub fn delete<H: Handler + 'static>(&mut self, pattern: &str,
        handler: H) -> &mut Self
    {
        self.add_route(Method::Delete, pattern, handler)
    }

    fn resort(&mut self) {
        let keys: Vec<Vec<u8>> = self.routes.iter()
            .map(|r| r.pattern.specificity())
            .collect();
        let mut order: Vec<usize> = (0..self.routes.len()).collect();
        // stable sort keeps insertion order between equal keys
        order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        self.order = order;
    }

    fn lookup(&self, method: &Method, path: &str) -> Outcome {
        let segments = split_path(path);

        if let Some(found) = self.lookup_method(method, &segments) {
            return found;
        }
        if *method == Method::Head {
            if let Some(found) = self.lookup_method(&Method::Get,
                &segments)
            {
                return found;
            }
        }

        let mut allow: Vec<Method> = Vec::new();
        for route in &self.routes {
            if route.method != *method
                && route.pattern.matches(&segments).is_some()
                && !allow.contains(&route.method)
            {
                allow.push(route.method.clone());
            }
        }
        if allow.is_empty() {
            Outcome::NoMatch
        } else {
            if allow.contains(&Method::Get)
                && !allow.contains(&Method::Head)
            {
                allow.push(Method::Head);
            }
            Outcome::WrongMethod(allow)
        }
    }

    fn lookup_method(&self, method: &Method, segments: &[&str])
        -> Option<Outcome>
    {
        for &i in &self.order {
            let route = &self.routes[i];
            if route.method != *method {
                continue;
            }
            if let Some(captures) = route.pattern.matches(segments) {
                return Some(Outcome::Found(&*route.handler, captures));
            }
        }
        None
    }
}

impl Handler for PathRouter {
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error> {
        let method = ctx.request.method().clone();
        let path = ctx.request.path().to_string();
        match self.lookup(&method, &path) {
            Outcome::Found(handler, captures) => {
                for &(ref name, ref value) in &captures {
                    ctx.request.path_params_mut().insert(name, value);
                }
                handler.handle(ctx)
            }
            Outcome::WrongMethod(allow) => {
                Err(Error::MethodNotAllowed(allow))
            }
            Outcome::NoMatch => Err(Error::NotFound),
        }
    }
}
