//! Branch router.
//!
//! `SendFieldsToBranch` projects each record once per target and forwards
//! the projection to the target stream. The original record is never
//! forwarded as-is.

use crate::trait_::{Emission, Operator, OperatorRole};
use async_trait::async_trait;
use retl_core::{FieldAddress, Record, RetlError, RetlResult, Value};
use serde::{Deserialize, Serialize};

/// A destination stream and the fields it receives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchTarget {
    /// Destination stream name
    pub dest: String,
    /// Fields to project, in written order
    pub fields: FieldAddress,
}

impl BranchTarget {
    /// Create a branch target
    #[must_use]
    pub fn new(dest: impl Into<String>, fields: FieldAddress) -> Self {
        Self {
            dest: dest.into(),
            fields,
        }
    }

    /// Parse `{dest: "...", fields: [...]}`
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for a malformed target and `InvalidRange`
    /// for a descending range
    pub fn from_value(value: &Value) -> RetlResult<Self> {
        let owner = SendFieldsToBranch::NAME;
        let dest = value
            .require("dest", owner)?
            .as_str()
            .ok_or_else(|| RetlError::definition(owner, "`dest` must be a string"))?;
        let fields = FieldAddress::from_value(value.require("fields", owner)?)?;
        Ok(Self::new(dest, fields))
    }
}

/// Routes field subsets of each record to other streams
#[derive(Debug, Clone)]
pub struct SendFieldsToBranch {
    targets: Vec<BranchTarget>,
}

impl SendFieldsToBranch {
    /// Registry name
    pub const NAME: &'static str = "SendFieldsToBranch";

    /// Create a router over the given targets
    #[must_use]
    pub fn new(targets: Vec<BranchTarget>) -> Self {
        Self { targets }
    }

    /// Parse `{targets: [{dest, fields}, ...]}`
    ///
    /// # Errors
    ///
    /// Returns error if `targets` is missing, empty or malformed
    pub fn from_config(config: &Value) -> RetlResult<Self> {
        let targets = config
            .require("targets", Self::NAME)?
            .as_array()
            .ok_or_else(|| RetlError::definition(Self::NAME, "`targets` must be an array"))?
            .iter()
            .map(BranchTarget::from_value)
            .collect::<RetlResult<Vec<_>>>()?;

        if targets.is_empty() {
            return Err(RetlError::definition(Self::NAME, "`targets` is empty"));
        }
        Ok(Self::new(targets))
    }

    /// Project `record` for every target, in target order
    ///
    /// # Errors
    ///
    /// Returns `FieldOutOfBounds` if any target addresses a missing field;
    /// nothing is routed in that case
    pub fn split(&self, record: &Record) -> RetlResult<Emission> {
        let mut emission = Emission::none();
        for target in &self.targets {
            let projected = target.fields.project(record)?;
            emission.route(target.dest.clone(), projected);
        }
        Ok(emission)
    }
}

#[async_trait]
impl Operator for SendFieldsToBranch {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> OperatorRole {
        OperatorRole::Router
    }

    fn branch_targets(&self) -> &[BranchTarget] {
        &self.targets
    }

    async fn process(&self, record: &Record) -> RetlResult<Emission> {
        self.split(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Value {
        serde_json::from_str(
            r#"{"targets": [
                {"dest": "nameMongo", "fields": [{"$range": [0, 4]}]},
                {"dest": "addressMongo", "fields": [0, {"$range": [5, 9]}]}
            ]}"#,
        )
        .unwrap()
    }

    fn ten_fields() -> Record {
        Record::from_texts((0..10).map(|i| format!("f{}", i)))
    }

    #[test]
    fn test_from_config() {
        let router = SendFieldsToBranch::from_config(&sample_config()).unwrap();
        let targets = router.branch_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].dest, "nameMongo");
        assert_eq!(targets[1].fields.indices(), vec![0, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_split_ten_fields() {
        let router = SendFieldsToBranch::from_config(&sample_config()).unwrap();
        let record = ten_fields();
        let emission = router.process(&record).await.unwrap();

        assert!(emission.records.is_empty());
        assert_eq!(emission.routed.len(), 2);

        let names = &emission.routed[0];
        assert_eq!(names.dest, "nameMongo");
        assert_eq!(names.record.len(), 5);

        let address = &emission.routed[1];
        assert_eq!(address.dest, "addressMongo");
        assert_eq!(address.record.len(), 6);
        assert_eq!(address.record, Record::from_texts(["f0", "f5", "f6", "f7", "f8", "f9"]));

        // First field duplicated across both branches
        assert_eq!(names.record.get(0), address.record.get(0));
    }

    #[tokio::test]
    async fn test_split_short_record_routes_nothing() {
        let router = SendFieldsToBranch::from_config(&sample_config()).unwrap();
        let result = router.process(&Record::from_texts(["only", "five", "f", "i", "v"])).await;
        assert_eq!(result, Err(RetlError::FieldOutOfBounds { index: 5, len: 5 }));
    }

    #[test]
    fn test_from_config_rejects_bad_targets() {
        assert!(SendFieldsToBranch::from_config(&Value::Null).is_err());

        let empty = Value::object([("targets", Value::Array(Vec::new()))]);
        assert!(SendFieldsToBranch::from_config(&empty).is_err());

        let descending: Value = serde_json::from_str(
            r#"{"targets": [{"dest": "a", "fields": [{"$range": [9, 5]}]}]}"#,
        )
        .unwrap();
        assert_eq!(
            SendFieldsToBranch::from_config(&descending).unwrap_err(),
            RetlError::InvalidRange { start: 9, end: 5 }
        );
    }

    #[tokio::test]
    async fn test_huge_range_target_is_out_of_bounds() {
        let config: Value = serde_json::from_str(
            r#"{"targets": [{"dest": "a", "fields": [{"$range": [0, 1099511627776]}]}]}"#,
        )
        .unwrap();
        let router = SendFieldsToBranch::from_config(&config).unwrap();
        let result = router.process(&Record::from_texts(["x", "y"])).await;
        assert_eq!(result, Err(RetlError::FieldOutOfBounds { index: 2, len: 2 }));
    }

    #[test]
    fn test_deserialized_target_checks_ranges() {
        let target: BranchTarget = serde_json::from_str(
            r#"{"dest": "a", "fields": {"terms": [{"Range": {"start": 0, "end": 4}}]}}"#,
        )
        .unwrap();
        assert_eq!(target.fields.width(), 5);

        let descending = serde_json::from_str::<BranchTarget>(
            r#"{"dest": "a", "fields": {"terms": [{"Range": {"start": 9, "end": 5}}]}}"#,
        );
        assert!(descending.is_err());
    }
}
