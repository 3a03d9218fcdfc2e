//! 上下文文档与解析后的上下文

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// NGSI-LD 核心命名空间
pub const CORE_NAMESPACE: &str = "https://uri.etsi.org/ngsi-ld/";

/// 不经过上下文展开的保留名称
pub const WELL_KNOWN_NAMES: [&str; 8] = [
    "location",
    "observationSpace",
    "operationSpace",
    "unitCode",
    "createdAt",
    "modifiedAt",
    "observedAt",
    "datasetId",
];

pub fn is_well_known(name: &str) -> bool {
    WELL_KNOWN_NAMES.contains(&name)
}

/// 一个已获取的上下文文档
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextDocument {
    pub url: String,
    /// 按出现顺序的术语定义（术语 -> IRI 或紧凑 IRI）
    pub terms: Vec<(String, String)>,
    pub vocab: Option<String>,
    /// 文档内引用的远程上下文，先于本文档术语生效
    pub imports: Vec<String>,
}

impl ContextDocument {
    /// 解析上下文文档，`@context` 可以是对象、字符串或二者组成的数组
    pub fn parse(url: &str, raw: &Value) -> Result<Self> {
        let context = raw.get("@context").ok_or_else(|| {
            AppError::ContextRetrievalFailure(format!("{url} has no @context member"))
        })?;
        let mut document = ContextDocument {
            url: url.to_string(),
            ..Default::default()
        };
        document.absorb(url, context)?;
        Ok(document)
    }

    fn absorb(&mut self, url: &str, context: &Value) -> Result<()> {
        match context {
            Value::String(import) => self.imports.push(import.clone()),
            Value::Array(items) => {
                for item in items {
                    self.absorb(url, item)?;
                }
            }
            Value::Object(definitions) => {
                for (term, definition) in definitions {
                    if term == "@vocab" {
                        self.vocab = definition.as_str().map(str::to_string);
                        continue;
                    }
                    if term.starts_with('@') {
                        continue;
                    }
                    let iri = match definition {
                        Value::String(iri) => Some(iri.clone()),
                        Value::Object(expanded) => expanded
                            .get("@id")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    };
                    if let Some(iri) = iri {
                        self.terms.push((term.clone(), iri));
                    }
                }
            }
            Value::Null => {}
            other => {
                return Err(AppError::ContextRetrievalFailure(format!(
                    "{url} has an unsupported @context entry: {other}"
                )));
            }
        }
        Ok(())
    }
}

/// 多个上下文文档合并后的结果，用于术语展开与压缩
#[derive(Debug, Clone, Default)]
pub struct ResolvedContext {
    terms: HashMap<String, String>,
    reverse: HashMap<String, String>,
    vocab: Option<String>,
}

impl ResolvedContext {
    /// 按顺序合并文档，后出现的定义覆盖先出现的
    pub fn from_documents(documents: &[Arc<ContextDocument>]) -> Self {
        let mut raw: HashMap<String, String> = HashMap::new();
        let mut vocab = None;
        for document in documents {
            for (term, iri) in &document.terms {
                raw.insert(term.clone(), iri.clone());
            }
            if document.vocab.is_some() {
                vocab = document.vocab.clone();
            }
        }

        let mut terms = HashMap::with_capacity(raw.len());
        for (term, iri) in &raw {
            terms.insert(term.clone(), expand_compact_iri(&raw, iri));
        }

        let mut reverse: HashMap<String, String> = HashMap::with_capacity(terms.len());
        for (term, iri) in &terms {
            let keep = reverse
                .get(iri)
                .map(|existing| (term.len(), term) < (existing.len(), existing))
                .unwrap_or(true);
            if keep {
                reverse.insert(iri.clone(), term.clone());
            }
        }
        for name in WELL_KNOWN_NAMES {
            reverse.insert(format!("{CORE_NAMESPACE}{name}"), name.to_string());
        }

        Self {
            terms,
            reverse,
            vocab,
        }
    }

    /// 将短名展开为完整 IRI
    pub fn expand(&self, name: &str) -> Result<String> {
        if is_well_known(name) {
            return Ok(format!("{CORE_NAMESPACE}{name}"));
        }
        if let Some(iri) = self.terms.get(name) {
            return Ok(iri.clone());
        }
        if let Some((prefix, suffix)) = name.split_once(':') {
            if !suffix.starts_with("//")
                && let Some(base) = self.terms.get(prefix)
            {
                return Ok(format!("{base}{suffix}"));
            }
            if suffix.starts_with("//") || prefix == "urn" {
                return Ok(name.to_string());
            }
        }
        if let Some(vocab) = &self.vocab
            && is_plain_term(name)
        {
            return Ok(format!("{vocab}{name}"));
        }
        Err(AppError::AttributeExpansionFailure(format!(
            "unable to expand '{name}' with the provided contexts"
        )))
    }

    /// 将完整 IRI 压缩为短名，无法压缩时原样返回
    pub fn compact(&self, iri: &str) -> String {
        if let Some(term) = self.reverse.get(iri) {
            return term.clone();
        }
        if let Some(vocab) = &self.vocab
            && let Some(rest) = iri.strip_prefix(vocab.as_str())
            && is_plain_term(rest)
        {
            return rest.to_string();
        }
        iri.to_string()
    }
}

fn is_plain_term(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn expand_compact_iri(terms: &HashMap<String, String>, iri: &str) -> String {
    if let Some((prefix, suffix)) = iri.split_once(':')
        && !suffix.starts_with("//")
        && let Some(base) = terms.get(prefix)
        && base != iri
    {
        return format!("{base}{suffix}");
    }
    iri.to_string()
}
