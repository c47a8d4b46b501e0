use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

use crate::{Error, Result, SearchHit};

/// Hybrid (keyword + vector) search over one Weaviate class through the GraphQL endpoint.
pub async fn hybrid_search(
	cfg: &parley_config::Backend,
	query: &str,
	top_k: u32,
) -> Result<Vec<SearchHit>> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = format!("{}/v1/graphql", cfg.url.trim_end_matches('/'));
	let body = serde_json::json!({ "query": build_hybrid_query(cfg, query, top_k)? });
	let mut request = client.post(url).json(&body);

	if let Some(api_key) = cfg.api_key.as_ref() {
		request = request.header(AUTHORIZATION, format!("Bearer {api_key}"));
	}

	let json: Value = request.send().await?.error_for_status()?.json().await?;

	parse_hybrid_response(&json, cfg)
}

fn build_hybrid_query(cfg: &parley_config::Backend, query: &str, top_k: u32) -> Result<String> {
	let escaped = serde_json::to_string(query)?;
	let id_field = cfg.id_field.as_deref().map(|field| format!(" {field}")).unwrap_or_default();

	Ok(format!(
		"{{ Get {{ {class}(hybrid: {{ query: {escaped}, alpha: {alpha} }}, limit: {top_k}) {{ {text}{id_field} _additional {{ id score }} }} }} }}",
		class = cfg.collection,
		alpha = cfg.alpha,
		text = cfg.text_field,
	))
}

fn parse_hybrid_response(json: &Value, cfg: &parley_config::Backend) -> Result<Vec<SearchHit>> {
	if let Some(errors) = json.get("errors").and_then(|v| v.as_array())
		&& !errors.is_empty()
	{
		let message = errors
			.iter()
			.filter_map(|err| err.get("message").and_then(|m| m.as_str()))
			.collect::<Vec<_>>()
			.join("; ");

		return Err(Error::InvalidResponse { message: format!("Weaviate query failed: {message}") });
	}

	let objects = json
		.get("data")
		.and_then(|data| data.get("Get"))
		.and_then(|get| get.get(cfg.collection.as_str()))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: format!("Weaviate response is missing data.Get.{}.", cfg.collection),
		})?;
	let mut hits = Vec::with_capacity(objects.len());

	for object in objects {
		let Some(text) = object
			.get(cfg.text_field.as_str())
			.and_then(|v| v.as_str())
			.filter(|text| !text.trim().is_empty())
		else {
			continue;
		};
		let additional = object.get("_additional");
		let id = cfg
			.id_field
			.as_deref()
			.and_then(|field| object.get(field))
			.and_then(value_as_id)
			.or_else(|| additional.and_then(|a| a.get("id")).and_then(value_as_id));
		let Some(id) = id else {
			continue;
		};
		// Weaviate reports hybrid scores as strings.
		let score = additional
			.and_then(|a| a.get("score"))
			.and_then(|score| match score {
				Value::String(raw) => raw.parse::<f32>().ok(),
				other => other.as_f64().map(|v| v as f32),
			})
			.unwrap_or(0.0);
		let metadata = object
			.as_object()
			.map(|fields| {
				fields
					.iter()
					.filter(|(key, _)| {
						key.as_str() != cfg.text_field && key.as_str() != "_additional"
					})
					.map(|(key, value)| (key.clone(), value.clone()))
					.collect::<Map<_, _>>()
			})
			.unwrap_or_default();

		hits.push(SearchHit { id, score, text: text.to_string(), metadata });
	}

	Ok(hits)
}

fn value_as_id(value: &Value) -> Option<String> {
	match value {
		Value::String(raw) if !raw.is_empty() => Some(raw.clone()),
		Value::Number(number) => Some(number.to_string()),
		_ => None,
	}
}
