//! XML-RPC wire codec
//!
//! Only the subset the controller speaks: scalar values, arrays, structs and
//! `nil`, wrapped in `methodCall` / `methodResponse` documents.

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors during XML-RPC encoding/decoding
#[derive(Error, Debug, PartialEq)]
pub enum XmlRpcError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Fault {code}: {message}")]
    Fault { code: i64, message: String },
}

/// A decoded XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Int(i64),
    Bool(bool),
    Double(f64),
    Str(String),
    Array(Vec<RpcValue>),
    Struct(BTreeMap<String, RpcValue>),
    Nil,
}

impl RpcValue {
    /// Integer view of a scalar
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcValue::Int(i) => Some(*i),
            RpcValue::Bool(b) => Some(*b as i64),
            RpcValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            RpcValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Status code of a reply: the scalar itself, or the first element of a tuple
    pub fn status_code(&self) -> Option<i64> {
        match self {
            RpcValue::Array(items) => items.first().and_then(RpcValue::as_i64),
            other => other.as_i64(),
        }
    }

    /// Truthiness the way a dynamically typed caller would judge it
    pub fn is_truthy(&self) -> bool {
        match self {
            RpcValue::Int(i) => *i != 0,
            RpcValue::Bool(b) => *b,
            RpcValue::Double(d) => *d != 0.0,
            RpcValue::Str(s) => !s.is_empty(),
            RpcValue::Array(items) => !items.is_empty(),
            RpcValue::Struct(members) => !members.is_empty(),
            RpcValue::Nil => false,
        }
    }
}

impl From<i64> for RpcValue {
    fn from(v: i64) -> Self {
        RpcValue::Int(v)
    }
}

impl From<bool> for RpcValue {
    fn from(v: bool) -> Self {
        RpcValue::Bool(v)
    }
}

impl From<&str> for RpcValue {
    fn from(v: &str) -> Self {
        RpcValue::Str(v.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(v: String) -> Self {
        RpcValue::Str(v)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> Result<String, XmlRpcError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find(';')
            .ok_or_else(|| XmlRpcError::Malformed("unterminated entity".into()))?;
        let entity = &rest[start + 1..start + end];
        let decoded = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => entity.strip_prefix('#').and_then(|d| d.parse().ok()),
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| XmlRpcError::Malformed(format!("unknown entity &{};", entity)))?
            }
        };
        out.push(decoded);
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn encode_value(value: &RpcValue, out: &mut String) {
    out.push_str("<value>");
    match value {
        RpcValue::Int(i) => out.push_str(&format!("<int>{}</int>", i)),
        RpcValue::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", *b as u8)),
        RpcValue::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        RpcValue::Str(s) => out.push_str(&format!("<string>{}</string>", escape(s))),
        RpcValue::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        RpcValue::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str(&format!("<member><name>{}</name>", escape(name)));
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        RpcValue::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Encode a `methodCall` document
pub fn encode_call(method: &str, params: &[RpcValue]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

/// Encode a `methodResponse` carrying one value
#[cfg(test)]
pub fn encode_response(value: &RpcValue) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    encode_value(value, &mut out);
    out.push_str("</param></params></methodResponse>\n");
    out
}

/// Encode a `methodResponse` carrying a fault
#[cfg(test)]
pub fn encode_fault(code: i64, message: &str) -> String {
    let mut members = BTreeMap::new();
    members.insert("faultCode".to_string(), RpcValue::Int(code));
    members.insert("faultString".to_string(), RpcValue::Str(message.to_string()));

    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    encode_value(&RpcValue::Struct(members), &mut out);
    out.push_str("</fault></methodResponse>\n");
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, XmlRpcError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('<') {
            if let Some(comment) = after.strip_prefix("!--") {
                let end = comment
                    .find("-->")
                    .ok_or_else(|| XmlRpcError::Malformed("unterminated comment".into()))?;
                rest = &comment[end + 3..];
                continue;
            }
            let end = after
                .find('>')
                .ok_or_else(|| XmlRpcError::Malformed("unterminated tag".into()))?;
            let tag = after[..end].trim();
            rest = &after[end + 1..];

            if tag.starts_with('?') || tag.starts_with('!') {
                continue;
            }
            let element = |t: &str| t.split_whitespace().next().unwrap_or_default().to_string();
            let token = if let Some(name) = tag.strip_prefix('/') {
                Token::Close(element(name))
            } else if let Some(name) = tag.strip_suffix('/') {
                Token::Empty(element(name))
            } else {
                Token::Open(element(tag))
            };
            tokens.push(token);
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            tokens.push(Token::Text(unescape(&rest[..end])?));
            rest = &rest[end..];
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, XmlRpcError> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, XmlRpcError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| XmlRpcError::Malformed("unexpected end of document".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn skip_whitespace(&mut self) {
        while let Some(Token::Text(t)) = self.peek() {
            if !t.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn expect_open(&mut self, name: &str) -> Result<(), XmlRpcError> {
        self.skip_whitespace();
        match self.next()? {
            Token::Open(n) if n == name => Ok(()),
            other => Err(XmlRpcError::Malformed(format!("expected <{}>, got {:?}", name, other))),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), XmlRpcError> {
        self.skip_whitespace();
        match self.next()? {
            Token::Close(n) if n == name => Ok(()),
            other => Err(XmlRpcError::Malformed(format!("expected </{}>, got {:?}", name, other))),
        }
    }

    fn is_close(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Close(n)) if n == name)
    }

    /// Text content up to the next tag (empty when there is none)
    fn text(&mut self) -> String {
        match self.peek() {
            Some(Token::Text(t)) => {
                let t = t.clone();
                self.pos += 1;
                t
            }
            _ => String::new(),
        }
    }

    fn value(&mut self) -> Result<RpcValue, XmlRpcError> {
        self.skip_whitespace();
        match self.next()? {
            Token::Open(n) if n == "value" => {}
            Token::Empty(n) if n == "value" => return Ok(RpcValue::Str(String::new())),
            other => return Err(XmlRpcError::Malformed(format!("expected <value>, got {:?}", other))),
        }

        // Untyped content is a string
        if let Some(Token::Text(t)) = self.peek() {
            if matches!(self.tokens.get(self.pos + 1), Some(Token::Close(n)) if n == "value") {
                let s = t.clone();
                self.pos += 2;
                return Ok(RpcValue::Str(s));
            }
        }
        if self.is_close("value") {
            self.pos += 1;
            return Ok(RpcValue::Str(String::new()));
        }

        self.skip_whitespace();
        let value = match self.next()? {
            Token::Empty(ty) => match ty.as_str() {
                "nil" => RpcValue::Nil,
                "string" => RpcValue::Str(String::new()),
                "array" => RpcValue::Array(Vec::new()),
                "struct" => RpcValue::Struct(BTreeMap::new()),
                other => return Err(XmlRpcError::Malformed(format!("empty <{}/>", other))),
            },
            Token::Open(ty) => {
                let value = self.typed(&ty)?;
                self.expect_close(&ty)?;
                value
            }
            other => return Err(XmlRpcError::Malformed(format!("unexpected {:?} in value", other))),
        };

        self.expect_close("value")?;
        Ok(value)
    }

    fn typed(&mut self, ty: &str) -> Result<RpcValue, XmlRpcError> {
        let malformed = |text: &str| XmlRpcError::Malformed(format!("bad <{}> content {:?}", ty, text));
        match ty {
            "int" | "i4" | "i8" => {
                let text = self.text();
                text.trim().parse().map(RpcValue::Int).map_err(|_| malformed(&text))
            }
            "boolean" => {
                let text = self.text();
                match text.trim() {
                    "1" | "true" => Ok(RpcValue::Bool(true)),
                    "0" | "false" => Ok(RpcValue::Bool(false)),
                    _ => Err(malformed(&text)),
                }
            }
            "double" => {
                let text = self.text();
                text.trim().parse().map(RpcValue::Double).map_err(|_| malformed(&text))
            }
            "string" | "dateTime.iso8601" | "base64" => Ok(RpcValue::Str(self.text())),
            "nil" => Ok(RpcValue::Nil),
            "array" => {
                let mut items = Vec::new();
                self.skip_whitespace();
                if matches!(self.peek(), Some(Token::Empty(n)) if n == "data") {
                    self.pos += 1;
                    return Ok(RpcValue::Array(items));
                }
                self.expect_open("data")?;
                loop {
                    self.skip_whitespace();
                    if self.is_close("data") {
                        break;
                    }
                    items.push(self.value()?);
                }
                self.expect_close("data")?;
                Ok(RpcValue::Array(items))
            }
            "struct" => {
                let mut members = BTreeMap::new();
                loop {
                    self.skip_whitespace();
                    if self.is_close("struct") {
                        break;
                    }
                    self.expect_open("member")?;
                    self.expect_open("name")?;
                    let name = self.text();
                    self.expect_close("name")?;
                    let value = self.value()?;
                    self.expect_close("member")?;
                    members.insert(name.trim().to_string(), value);
                }
                Ok(RpcValue::Struct(members))
            }
            other => Err(XmlRpcError::Malformed(format!("unknown type <{}>", other))),
        }
    }
}

/// Decode a `methodResponse`. A fault becomes [`XmlRpcError::Fault`].
pub fn decode_response(body: &str) -> Result<RpcValue, XmlRpcError> {
    let mut parser = Parser::new(body)?;
    parser.expect_open("methodResponse")?;
    parser.skip_whitespace();

    match parser.next()? {
        Token::Open(n) if n == "params" => {
            parser.skip_whitespace();
            if parser.is_close("params") {
                return Ok(RpcValue::Nil);
            }
            parser.expect_open("param")?;
            parser.value()
        }
        Token::Open(n) if n == "fault" => {
            let RpcValue::Struct(members) = parser.value()? else {
                return Err(XmlRpcError::Malformed("fault is not a struct".into()));
            };
            let code = members
                .get("faultCode")
                .and_then(RpcValue::as_i64)
                .unwrap_or_default();
            let message = match members.get("faultString") {
                Some(RpcValue::Str(s)) => s.clone(),
                _ => String::new(),
            };
            Err(XmlRpcError::Fault { code, message })
        }
        Token::Empty(n) if n == "params" => Ok(RpcValue::Nil),
        other => Err(XmlRpcError::Malformed(format!("unexpected {:?} in response", other))),
    }
}

/// Decode a `methodCall` into its method name and parameters
#[cfg(test)]
pub fn decode_call(body: &str) -> Result<(String, Vec<RpcValue>), XmlRpcError> {
    let mut parser = Parser::new(body)?;
    parser.expect_open("methodCall")?;
    parser.expect_open("methodName")?;
    let method = parser.text().trim().to_string();
    parser.expect_close("methodName")?;

    let mut params = Vec::new();
    parser.skip_whitespace();
    if matches!(parser.peek(), Some(Token::Open(n)) if n == "params") {
        parser.pos += 1;
        loop {
            parser.skip_whitespace();
            if parser.is_close("params") {
                break;
            }
            parser.expect_open("param")?;
            params.push(parser.value()?);
            parser.expect_close("param")?;
        }
    }
    Ok((method, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tuple_response() {
        let body = r#"<?xml version="1.0"?>
<methodResponse>
  <params>
    <param>
      <value><array><data>
        <value><int>0</int></value>
        <value><i4>1</i4></value>
        <value>plain</value>
      </data></array></value>
    </param>
  </params>
</methodResponse>"#;

        let value = decode_response(body).unwrap();
        assert_eq!(
            value,
            RpcValue::Array(vec![
                RpcValue::Int(0),
                RpcValue::Int(1),
                RpcValue::Str("plain".into())
            ])
        );
        assert_eq!(value.status_code(), Some(0));
    }

    #[test]
    fn test_decode_fault() {
        let body = encode_fault(-32601, "method \"Nope\" is not supported");
        assert_eq!(
            decode_response(&body),
            Err(XmlRpcError::Fault {
                code: -32601,
                message: "method \"Nope\" is not supported".into()
            })
        );
    }

    #[test]
    fn test_call_round_trip_with_escaping() {
        let params = vec![
            RpcValue::Int(0),
            RpcValue::from("a<b&c.lua"),
            RpcValue::Bool(true),
        ];
        let body = encode_call("FileUpload", &params);
        assert!(body.contains("<string>a&lt;b&amp;c.lua</string>"));

        let (method, decoded) = decode_call(&body).unwrap();
        assert_eq!(method, "FileUpload");
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_decode_scalars_and_struct() {
        let body = "<methodResponse><params><param><value><struct>\
            <member><name>ok</name><value><boolean>1</boolean></value></member>\
            <member><name>ratio</name><value><double>0.5</double></value></member>\
            <member><name>none</name><value><nil/></value></member>\
            </struct></value></param></params></methodResponse>";

        let RpcValue::Struct(members) = decode_response(body).unwrap() else {
            panic!("expected struct");
        };
        assert_eq!(members["ok"], RpcValue::Bool(true));
        assert_eq!(members["ratio"], RpcValue::Double(0.5));
        assert_eq!(members["none"], RpcValue::Nil);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            decode_response("<methodResponse><params><param><value><int>x</int></value>"),
            Err(XmlRpcError::Malformed(_))
        ));
        assert!(matches!(decode_response("not xml"), Err(XmlRpcError::Malformed(_))));
    }

    #[test]
    fn test_truthiness_and_codes() {
        assert!(!RpcValue::Nil.is_truthy());
        assert!(!RpcValue::Int(0).is_truthy());
        assert!(RpcValue::Str("x".into()).is_truthy());
        assert_eq!(RpcValue::Bool(true).status_code(), Some(1));
        assert_eq!(RpcValue::Str(" 130 ".into()).status_code(), Some(130));
        assert_eq!(RpcValue::Array(vec![]).status_code(), None);
    }
}
