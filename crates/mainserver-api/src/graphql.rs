use serde::{Deserialize, Serialize};

/// A GraphQL operation as sent over either link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: serde_json::Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Kind of the operation this request executes.
    ///
    /// When an operation name is set, the definition with that name wins;
    /// otherwise the first operation definition in the document. Documents
    /// without any recognizable operation are treated as queries.
    pub fn kind(&self) -> OperationKind {
        let definitions = operation_definitions(&self.query);
        let selected = match self.operation_name.as_deref() {
            Some(name) => definitions
                .iter()
                .find(|d| d.name.as_deref() == Some(name))
                .or_else(|| definitions.first()),
            None => definitions.first(),
        };
        selected.map_or(OperationKind::Query, |d| d.kind)
    }
}

impl GraphQlResponse {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Definition {
    kind: OperationKind,
    name: Option<String>,
}

/// Scan the top level of a document for operation definitions.
///
/// Only the executable-definition headers matter here, so the scanner tracks
/// brace and parenthesis depth, skips comments and string literals, and
/// reads keywords appearing at depth zero.
fn operation_definitions(document: &str) -> Vec<Definition> {
    let bytes = document.as_bytes();
    let mut definitions = Vec::new();
    let mut braces = 0usize;
    let mut parens = 0usize;
    // A definition header has been read and its selection set is next.
    let mut awaiting_body = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'"' => i = skip_string(bytes, i),
            b'(' => {
                parens += 1;
                i += 1;
            }
            b')' => {
                parens = parens.saturating_sub(1);
                i += 1;
            }
            b'{' => {
                if braces == 0 && parens == 0 {
                    if awaiting_body {
                        awaiting_body = false;
                    } else {
                        definitions.push(Definition {
                            kind: OperationKind::Query,
                            name: None,
                        });
                    }
                }
                braces += 1;
                i += 1;
            }
            b'}' => {
                braces = braces.saturating_sub(1);
                i += 1;
            }
            b'@' | b'$' => {
                // Directive and variable names are never keywords.
                i = skip_name(bytes, i + 1);
            }
            c if braces == 0 && parens == 0 && is_name_start(c) => {
                let end = skip_name(bytes, i);
                let word = &document[i..end];
                i = end;
                let kind = match word {
                    "query" => Some(OperationKind::Query),
                    "mutation" => Some(OperationKind::Mutation),
                    "subscription" => Some(OperationKind::Subscription),
                    "fragment" => {
                        awaiting_body = true;
                        None
                    }
                    _ => None,
                };
                if let Some(kind) = kind {
                    i = skip_ignored(bytes, i);
                    let name = if i < bytes.len() && is_name_start(bytes[i]) {
                        let end = skip_name(bytes, i);
                        let name = document[i..end].to_string();
                        i = end;
                        Some(name)
                    } else {
                        None
                    };
                    definitions.push(Definition { kind, name });
                    awaiting_body = true;
                }
            }
            _ => i += 1,
        }
    }

    definitions
}

fn is_name_start(c: u8) -> bool {
    c == b'_' || c.is_ascii_alphabetic()
}

fn skip_name(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    i
}

/// Skip whitespace, commas and comments.
fn skip_ignored(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}

/// Skip a string or block string starting at `start`, returning the index
/// just past its closing quote.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    if bytes[start..].starts_with(b"\"\"\"") {
        let mut i = start + 3;
        while i < bytes.len() {
            if bytes[i] == b'\\' && bytes[i + 1..].starts_with(b"\"\"\"") {
                i += 4;
            } else if bytes[i..].starts_with(b"\"\"\"") {
                return i + 3;
            } else {
                i += 1;
            }
        }
        return bytes.len();
    }

    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}
