use std::collections::HashMap;
use std::io::Read;

use im::HashMap as ImHashMap;
use serde_json::{Deserializer, Map, Value as Json};

use crate::context::{get_as, ContextRef};
use crate::error::JexError;
use crate::exp::Exp;

pub const MODULE_NAME_KEY: &str = "module-name";
pub const FILE_NAME_KEY: &str = "file-name";

/// A sub-parser for one form keyword: receives the parser, the keyword
/// and the keyword's JSON payload.
pub type FormParser = fn(&JsonParser, &str, &Json) -> Result<Exp, JexError>;

/// Translates JSON documents into expressions.
///
/// Literals map to same-kind values, a string is a `var` redex, a
/// non-empty array is an `apply` redex, and a single-key object
/// dispatches on its key: registered form keywords get their
/// sub-parser, the `data` keyword switches to 1:1 literal parsing, and
/// anything else goes to the default parser or is a syntax error.
pub struct JsonParser {
    var_redex: String,
    apply_redex: String,
    forms: HashMap<String, FormParser>,
    default_form: Option<FormParser>,
}

impl JsonParser {
    pub fn new(var_redex: &str, apply_redex: &str, data_redex: &str) -> Self {
        let mut parser = Self {
            var_redex: var_redex.to_string(),
            apply_redex: apply_redex.to_string(),
            forms: HashMap::new(),
            default_form: None,
        };
        parser.register_form(data_redex, Some(parse_data_form));
        parser
    }

    /// The parser for the kernel language: `var`/`apply`/`data` plus
    /// every kernel form keyword.
    pub fn kernel() -> Self {
        let mut parser = Self::new("var", "apply", "data");
        parser.register_form("func", Some(parse_func));
        parser.register_form("def", Some(parse_def));
        parser.register_form("set", Some(parse_set));
        parser.register_form("begin", Some(parse_begin));
        parser.register_form("block", Some(parse_block));
        parser.register_form("if", Some(parse_if));
        parser.register_form("import", Some(parse_import));
        parser.register_form("export", Some(parse_export));
        parser
    }

    pub fn register_form(&mut self, name: &str, parser: Option<FormParser>) -> Option<FormParser> {
        match parser {
            Some(p) => self.forms.insert(name.to_string(), p),
            None => self.forms.remove(name),
        }
    }

    pub fn register_default_form(&mut self, parser: Option<FormParser>) -> Option<FormParser> {
        std::mem::replace(&mut self.default_form, parser)
    }

    /// Read one JSON document from `reader` and parse it as a term.
    pub fn parse(&self, _ctx: &ContextRef, reader: impl Read) -> Result<Exp, JexError> {
        let json: Json =
            serde_json::from_reader(reader).map_err(|e| JexError::syntax(e.to_string()))?;
        self.parse_value(&json)
    }

    pub fn parse_source(&self, source: &str) -> Result<Exp, JexError> {
        let json: Json =
            serde_json::from_str(source).map_err(|e| JexError::syntax(e.to_string()))?;
        self.parse_value(&json)
    }

    /// Read every JSON document from `reader` and wrap the sequence as
    /// a `module` redex; the module name and file name come from the
    /// context the loader prepared.
    pub fn parse_module(&self, ctx: &ContextRef, reader: impl Read) -> Result<Exp, JexError> {
        let name = get_as::<String>(ctx, MODULE_NAME_KEY)
            .ok_or_else(|| JexError::syntax("module parser needs a module name in the context"))?;
        let file = get_as::<String>(ctx, FILE_NAME_KEY).unwrap_or_default();

        let mut body = Vec::new();
        for document in Deserializer::from_reader(reader).into_iter::<Json>() {
            let json = document.map_err(|e| JexError::syntax(e.to_string()))?;
            body.push(self.parse_value(&json)?);
        }

        Ok(Exp::redex(
            "module",
            Exp::MapExp(im::hashmap! {
                "name".to_string() => Exp::string(name),
                "file".to_string() => Exp::string(file),
                "body".to_string() => Exp::ListExp(body),
            }),
        ))
    }

    pub fn parse_module_source(&self, ctx: &ContextRef, source: &str) -> Result<Exp, JexError> {
        self.parse_module(ctx, source.as_bytes())
    }

    pub fn parse_value(&self, json: &Json) -> Result<Exp, JexError> {
        match json {
            Json::Null => Ok(Exp::Null),
            Json::Bool(b) => Ok(Exp::Bool(*b)),
            Json::Number(n) => Ok(Exp::Number(number_of(n)?)),
            Json::String(s) => Ok(Exp::redex(&self.var_redex, Exp::string(s.clone()))),
            Json::Array(items) => {
                if items.is_empty() {
                    return Err(JexError::syntax("invalid function application: []"));
                }
                Ok(Exp::redex(
                    &self.apply_redex,
                    Exp::ListExp(self.parse_list(items)?),
                ))
            }
            Json::Object(entries) => {
                if entries.len() != 1 {
                    return Err(JexError::syntax(format!(
                        "special form objects have exactly one key, got {}",
                        entries.len()
                    )));
                }
                let (keyword, payload) = entries.iter().next().unwrap();
                match self.forms.get(keyword) {
                    Some(form) => form(self, keyword, payload),
                    None => match self.default_form {
                        Some(form) => form(self, keyword, payload),
                        None => Err(JexError::syntax(format!("cannot handle form {:?}", keyword))),
                    },
                }
            }
        }
    }

    pub fn parse_list(&self, items: &[Json]) -> Result<Vec<Exp>, JexError> {
        items.iter().map(|item| self.parse_value(item)).collect()
    }

    pub fn parse_map(&self, entries: &Map<String, Json>) -> Result<ImHashMap<String, Exp>, JexError> {
        let mut parsed = ImHashMap::new();
        for (key, value) in entries {
            parsed.insert(key.clone(), self.parse_value(value)?);
        }
        Ok(parsed)
    }

    /// Literal mode: JSON maps to values 1:1, nothing is a redex.
    pub fn parse_data(&self, json: &Json) -> Result<Exp, JexError> {
        match json {
            Json::Null => Ok(Exp::Null),
            Json::Bool(b) => Ok(Exp::Bool(*b)),
            Json::Number(n) => Ok(Exp::Number(number_of(n)?)),
            Json::String(s) => Ok(Exp::string(s.clone())),
            Json::Array(items) => Ok(Exp::ListValue(
                items
                    .iter()
                    .map(|item| self.parse_data(item))
                    .collect::<Result<_, _>>()?,
            )),
            Json::Object(entries) => {
                let mut parsed = ImHashMap::new();
                for (key, value) in entries {
                    parsed.insert(key.clone(), self.parse_data(value)?);
                }
                Ok(Exp::MapValue(parsed))
            }
        }
    }
}

fn number_of(n: &serde_json::Number) -> Result<f64, JexError> {
    n.as_f64()
        .ok_or_else(|| JexError::syntax(format!("number {} does not fit a double", n)))
}

fn payload_array<'a>(keyword: &str, payload: &'a Json) -> Result<&'a Vec<Json>, JexError> {
    match payload {
        Json::Array(items) => Ok(items),
        _ => Err(JexError::syntax(format!(
            "invalid {} syntax: expected an array",
            keyword
        ))),
    }
}

fn payload_object<'a>(keyword: &str, payload: &'a Json) -> Result<&'a Map<String, Json>, JexError> {
    match payload {
        Json::Object(entries) if !entries.is_empty() => Ok(entries),
        _ => Err(JexError::syntax(format!(
            "invalid {} syntax: expected a non-empty object",
            keyword
        ))),
    }
}

/// One expression, or several wrapped in a `begin`.
fn body_or_begin(parser: &JsonParser, body: &[Json]) -> Result<Exp, JexError> {
    match body {
        [] => Err(JexError::syntax("empty body")),
        [single] => parser.parse_value(single),
        many => Ok(Exp::redex("begin", Exp::ListExp(parser.parse_list(many)?))),
    }
}

fn parse_data_form(parser: &JsonParser, _keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    parser.parse_data(payload)
}

fn parse_func(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let items = payload_array(keyword, payload)?;
    if items.len() < 2 {
        return Err(JexError::syntax("invalid func syntax: expected [[params ...], body ...]"));
    }
    let params = match &items[0] {
        Json::Array(params) => params,
        _ => {
            return Err(JexError::syntax(
                "invalid func syntax: parameters must be an array of strings",
            ))
        }
    };
    let mut param_exps = Vec::with_capacity(params.len());
    for param in params {
        match param {
            Json::String(s) => param_exps.push(Exp::string(s.clone())),
            _ => {
                return Err(JexError::syntax(
                    "invalid func syntax: parameters must be strings",
                ))
            }
        }
    }
    let body = body_or_begin(parser, &items[1..])?;
    Ok(Exp::redex(
        "func",
        Exp::ListExp(vec![Exp::ListExp(param_exps), body]),
    ))
}

fn parse_begin(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let items = payload_array(keyword, payload)?;
    if items.is_empty() {
        return Err(JexError::syntax("invalid begin syntax: empty sequence"));
    }
    Ok(Exp::redex("begin", Exp::ListExp(parser.parse_list(items)?)))
}

fn parse_block(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let items = payload_array(keyword, payload)?;
    if items.is_empty() {
        return Err(JexError::syntax("invalid block syntax: empty body"));
    }
    Ok(Exp::redex("block", body_or_begin(parser, items)?))
}

fn parse_if(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let items = payload_array(keyword, payload)?;
    if items.len() != 3 {
        return Err(JexError::syntax(
            "invalid if syntax: expected [test, then, else]",
        ));
    }
    Ok(Exp::redex("if", Exp::ListExp(parser.parse_list(items)?)))
}

fn parse_def(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let entries = payload_object(keyword, payload)?;
    Ok(Exp::redex("def", Exp::MapExp(parser.parse_map(entries)?)))
}

fn parse_set(parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let entries = payload_object(keyword, payload)?;
    Ok(Exp::redex("set", Exp::MapExp(parser.parse_map(entries)?)))
}

/// `{"import": {"module": ["name", ["name", "alias"], ...], ...}}`
/// normalized to `[name, explicit]` / `[name, alias, explicit]`
/// triples; surface imports are always explicit.
fn parse_import(_parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let entries = payload_object(keyword, payload)?;
    let mut parsed = ImHashMap::new();
    for (module_name, specs) in entries {
        let specs = payload_array(keyword, specs)?;
        let mut items = Vec::with_capacity(specs.len());
        for spec in specs {
            items.push(parse_name_spec(spec, "import", true)?);
        }
        parsed.insert(module_name.clone(), Exp::ListExp(items));
    }
    Ok(Exp::redex("import", Exp::MapExp(parsed)))
}

/// `{"export": ["name", ["name", "alias"], ...]}`
fn parse_export(_parser: &JsonParser, keyword: &str, payload: &Json) -> Result<Exp, JexError> {
    let specs = payload_array(keyword, payload)?;
    if specs.is_empty() {
        return Err(JexError::syntax("invalid export syntax: empty list"));
    }
    let mut items = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            Json::String(name) => items.push(Exp::string(name.clone())),
            _ => items.push(parse_name_spec(spec, "export", false)?),
        }
    }
    Ok(Exp::redex("export", Exp::ListExp(items)))
}

/// `"name"` or `["name", "alias"]`, optionally tagged explicit.
fn parse_name_spec(spec: &Json, form: &str, explicit: bool) -> Result<Exp, JexError> {
    let mut items = match spec {
        Json::String(name) => vec![Exp::string(name.clone())],
        Json::Array(parts) => match parts.as_slice() {
            [Json::String(name), Json::String(alias)] => {
                vec![Exp::string(name.clone()), Exp::string(alias.clone())]
            }
            _ => {
                return Err(JexError::syntax(format!(
                    "invalid {} spec: expected [\"name\", \"alias\"]",
                    form
                )))
            }
        },
        _ => {
            return Err(JexError::syntax(format!(
                "invalid {} spec: expected a name or [\"name\", \"alias\"]",
                form
            )))
        }
    };
    if explicit {
        items.push(Exp::Bool(true));
    }
    Ok(Exp::ListExp(items))
}
