use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPermissionsRequest {
    pub permission_ids: Vec<i64>,
}
