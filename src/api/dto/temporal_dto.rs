//! 时态查询 DTO
//!
//! 查询字符串参数、Link 头解析，以及分页 Link 头的生成。

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::services::temporal_query::TemporalQueryParams;

pub const JSON_LD_CONTEXT_REL: &str = "http://www.w3.org/ns/json-ld#context";
/// `NGSILD-Results-Count`（header 名统一小写）
pub const RESULTS_COUNT_HEADER: &str = "ngsild-results-count";

/// 时态实体查询参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemporalQueryDto {
    pub id: Option<String>,
    pub id_pattern: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub attrs: Option<String>,
    pub q: Option<String>,
    pub georel: Option<String>,
    pub geometry: Option<String>,
    pub coordinates: Option<String>,
    pub geoproperty: Option<String>,
    pub timerel: Option<String>,
    pub timeproperty: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<String>,
    pub last_n: Option<u32>,
    pub options: Option<String>,
    pub page_size: Option<u32>,
    pub page_anchor: Option<String>,
    pub count: bool,
}

impl TemporalQueryDto {
    pub fn into_params(self, link_context: Option<String>) -> TemporalQueryParams {
        TemporalQueryParams {
            id: self.id,
            id_pattern: self.id_pattern,
            entity_type: self.entity_type,
            attrs: self.attrs,
            q: self.q,
            georel: self.georel,
            geometry: self.geometry,
            coordinates: self.coordinates,
            geoproperty: self.geoproperty,
            timerel: self.timerel,
            timeproperty: self.timeproperty,
            time: self.time,
            end_time: self.end_time,
            last_n: self.last_n,
            options: self.options,
            page_size: self.page_size,
            page_anchor: self.page_anchor,
            count: self.count,
            link_context,
        }
    }
}

/// 从 `Link` 头取 JSON-LD 上下文地址
pub fn link_context(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(axum::http::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find(|link| link.contains(JSON_LD_CONTEXT_REL))
        .and_then(|link| {
            let start = link.find('<')?;
            let end = link[start..].find('>')? + start;
            Some(link[start + 1..end].trim().to_string())
        })
        .filter(|url| !url.is_empty())
}

/// 分页 Link 头：沿用原查询参数，替换 pageAnchor
pub fn page_link(path: &str, raw_query: Option<&str>, anchor: &str, rel: &str) -> String {
    let mut params: Vec<String> = raw_query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("pageAnchor="))
        .map(str::to_string)
        .collect();
    params.push(format!("pageAnchor={}", urlencoding::encode(anchor)));
    format!("<{path}?{}>; rel=\"{rel}\"", params.join("&"))
}
