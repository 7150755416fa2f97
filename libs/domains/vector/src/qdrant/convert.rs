//! Conversions between engine models and qdrant-client protobuf types.

use std::collections::HashMap;

use qdrant_client::qdrant::{
    self, Condition, Distance, Filter, PointId, Value as QdrantValue, value::Kind,
};
use uuid::Uuid;

use crate::error::{VectorError, VectorResult};
use crate::models::{CollectionStatus, DistanceMetric, SearchFilter};

pub(crate) fn to_qdrant_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Euclidean => Distance::Euclid,
        DistanceMetric::DotProduct => Distance::Dot,
        DistanceMetric::Manhattan => Distance::Manhattan,
    }
}

pub(crate) fn from_qdrant_distance(distance: Distance) -> DistanceMetric {
    match distance {
        Distance::Euclid => DistanceMetric::Euclidean,
        Distance::Dot => DistanceMetric::DotProduct,
        Distance::Manhattan => DistanceMetric::Manhattan,
        _ => DistanceMetric::Cosine,
    }
}

pub(crate) fn from_qdrant_status(status: qdrant::CollectionStatus) -> CollectionStatus {
    match status {
        qdrant::CollectionStatus::Green => CollectionStatus::Green,
        qdrant::CollectionStatus::Yellow => CollectionStatus::Yellow,
        qdrant::CollectionStatus::Red => CollectionStatus::Red,
        _ => CollectionStatus::Grey,
    }
}

pub(crate) fn uuid_to_point_id(id: Uuid) -> PointId {
    PointId::from(id.to_string())
}

pub(crate) fn point_id_to_uuid(point_id: Option<&PointId>) -> VectorResult<Uuid> {
    match point_id.and_then(|p| p.point_id_options.as_ref()) {
        Some(qdrant::point_id::PointIdOptions::Uuid(uuid_str)) => Uuid::parse_str(uuid_str)
            .map_err(|e| VectorError::Internal(format!("Invalid UUID: {}", e))),
        Some(qdrant::point_id::PointIdOptions::Num(num)) => Ok(Uuid::from_u128(*num as u128)),
        None => Err(VectorError::Internal("Missing point ID".to_string())),
    }
}

pub(crate) fn payload_to_qdrant(
    payload: Option<&serde_json::Value>,
) -> VectorResult<HashMap<String, QdrantValue>> {
    match payload {
        None | Some(serde_json::Value::Null) => Ok(HashMap::new()),
        Some(serde_json::Value::Object(map)) => Ok(map
            .iter()
            .filter_map(|(key, val)| json_to_qdrant_value(val).map(|v| (key.clone(), v)))
            .collect()),
        Some(other) => Err(VectorError::validation(format!(
            "payload must be a JSON object, got {}",
            other
        ))),
    }
}

pub(crate) fn qdrant_to_payload(payload: HashMap<String, QdrantValue>) -> Option<serde_json::Value> {
    if payload.is_empty() {
        return None;
    }

    let map = payload
        .into_iter()
        .filter_map(|(key, val)| qdrant_value_to_json(val).map(|v| (key, v)))
        .collect();
    Some(serde_json::Value::Object(map))
}

fn json_to_qdrant_value(val: &serde_json::Value) -> Option<QdrantValue> {
    let kind = match val {
        serde_json::Value::Null => return None,
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64()?),
        },
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(qdrant::ListValue {
            values: items.iter().filter_map(json_to_qdrant_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(qdrant::Struct {
            fields: map
                .iter()
                .filter_map(|(k, v)| json_to_qdrant_value(v).map(|v| (k.clone(), v)))
                .collect(),
        }),
    };
    Some(QdrantValue { kind: Some(kind) })
}

fn qdrant_value_to_json(val: QdrantValue) -> Option<serde_json::Value> {
    match val.kind? {
        Kind::NullValue(_) => Some(serde_json::Value::Null),
        Kind::BoolValue(b) => Some(serde_json::Value::Bool(b)),
        Kind::IntegerValue(i) => Some(serde_json::Value::Number(i.into())),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(f).map(serde_json::Value::Number),
        Kind::StringValue(s) => Some(serde_json::Value::String(s)),
        Kind::ListValue(list) => Some(serde_json::Value::Array(
            list.values.into_iter().filter_map(qdrant_value_to_json).collect(),
        )),
        Kind::StructValue(st) => Some(serde_json::Value::Object(
            st.fields
                .into_iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|v| (k, v)))
                .collect(),
        )),
    }
}

fn match_condition(key: &str, value: &serde_json::Value) -> VectorResult<Condition> {
    match value {
        serde_json::Value::String(s) => Ok(Condition::matches(key, s.clone())),
        serde_json::Value::Bool(b) => Ok(Condition::matches(key, *b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|i| Condition::matches(key, i))
            .ok_or_else(|| {
                VectorError::validation(format!(
                    "filter on '{}' must use an integer, string or bool value",
                    key
                ))
            }),
        other => Err(VectorError::validation(format!(
            "unsupported filter value for '{}': {}",
            key, other
        ))),
    }
}

pub(crate) fn to_qdrant_filter(filter: &SearchFilter) -> VectorResult<Filter> {
    let mut must = filter
        .must
        .iter()
        .map(|(k, v)| match_condition(k, v))
        .collect::<VectorResult<Vec<_>>>()?;
    let must_not = filter
        .must_not
        .iter()
        .map(|(k, v)| match_condition(k, v))
        .collect::<VectorResult<Vec<_>>>()?;

    if let Some(text) = &filter.text {
        must.push(Condition::matches_text(&text.field, &text.text));
    }

    Ok(Filter {
        must,
        must_not,
        ..Default::default()
    })
}

/// Extract vector values from VectorsOutput
#[allow(deprecated)]
pub(crate) fn extract_vector(vectors: Option<&qdrant::VectorsOutput>) -> Option<Vec<f32>> {
    match vectors?.vectors_options.as_ref()? {
        qdrant::vectors_output::VectorsOptions::Vector(v) => Some(v.data.clone()),
        qdrant::vectors_output::VectorsOptions::Vectors(map) => {
            map.vectors.values().next().map(|v| v.data.clone())
        }
    }
}
