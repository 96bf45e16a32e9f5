use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRolesRequest {
    pub role_ids: Vec<i64>,
}
