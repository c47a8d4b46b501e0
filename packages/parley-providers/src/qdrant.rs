use std::{collections::HashMap, time::Duration};

use qdrant_client::{
	Qdrant,
	qdrant::{
		PointId, Query, QueryPointsBuilder, ScoredPoint, Value, point_id::PointIdOptions,
		value::Kind,
	},
};
use serde_json::{Map, Number};

use crate::{Result, SearchHit};

/// Dense similarity search over one Qdrant collection.
pub struct QdrantSearch {
	client: Qdrant,
	collection: String,
	vector_name: Option<String>,
	text_field: String,
	id_field: Option<String>,
}
impl QdrantSearch {
	pub fn new(cfg: &parley_config::Backend) -> Result<Self> {
		let mut builder =
			Qdrant::from_url(&cfg.url).timeout(Duration::from_millis(cfg.timeout_ms));

		if let Some(api_key) = cfg.api_key.as_ref() {
			builder = builder.api_key(api_key.clone());
		}

		Ok(Self {
			client: builder.build()?,
			collection: cfg.collection.clone(),
			vector_name: cfg.vector_name.clone(),
			text_field: cfg.text_field.clone(),
			id_field: cfg.id_field.clone(),
		})
	}

	pub async fn search(&self, vector: Vec<f32>, top_k: u32) -> Result<Vec<SearchHit>> {
		let mut request = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.limit(top_k as u64)
			.with_payload(true);

		if let Some(name) = self.vector_name.as_ref() {
			request = request.using(name.clone());
		}

		let response = self.client.query(request).await?;

		Ok(response
			.result
			.into_iter()
			.filter_map(|point| point_to_hit(point, &self.text_field, self.id_field.as_deref()))
			.collect())
	}
}

fn point_to_hit(point: ScoredPoint, text_field: &str, id_field: Option<&str>) -> Option<SearchHit> {
	let text = payload_string(&point.payload, text_field)?;
	let id = id_field
		.and_then(|field| payload_string(&point.payload, field))
		.or_else(|| point.id.as_ref().and_then(point_id_string))?;
	let metadata = point
		.payload
		.iter()
		.filter(|(key, _)| key.as_str() != text_field)
		.map(|(key, value)| (key.clone(), value_to_json(value)))
		.collect();

	Some(SearchHit { id, score: point.score, text, metadata })
}

fn point_id_string(point_id: &PointId) -> Option<String> {
	match point_id.point_id_options.as_ref()? {
		PointIdOptions::Uuid(id) => Some(id.clone()),
		PointIdOptions::Num(id) => Some(id.to_string()),
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) if !text.trim().is_empty() => Some(text.clone()),
		Some(Kind::IntegerValue(number)) => Some(number.to_string()),
		_ => None,
	}
}

fn value_to_json(value: &Value) -> serde_json::Value {
	match &value.kind {
		Some(Kind::BoolValue(flag)) => serde_json::Value::Bool(*flag),
		Some(Kind::IntegerValue(number)) => serde_json::Value::from(*number),
		Some(Kind::DoubleValue(number)) =>
			Number::from_f64(*number).map(serde_json::Value::Number).unwrap_or_default(),
		Some(Kind::StringValue(text)) => serde_json::Value::String(text.clone()),
		Some(Kind::ListValue(list)) =>
			serde_json::Value::Array(list.values.iter().map(value_to_json).collect()),
		Some(Kind::StructValue(object)) => serde_json::Value::Object(
			object
				.fields
				.iter()
				.map(|(key, value)| (key.clone(), value_to_json(value)))
				.collect::<Map<_, _>>(),
		),
		Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
	}
}
