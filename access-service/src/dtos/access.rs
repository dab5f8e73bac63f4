use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{GrantRequest, ModuleDraft};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ModuleInput {
    #[validate(length(min = 1, max = 100, message = "Module name must be 1-100 characters"))]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 255, message = "Description must be at most 255 characters"))]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateModulesRequest {
    #[validate(length(min = 1, message = "At least one module is required"), nested)]
    pub modules: Vec<ModuleInput>,
}

impl CreateModulesRequest {
    pub fn drafts(&self) -> Vec<ModuleDraft> {
        self.modules
            .iter()
            .map(|m| ModuleDraft {
                name: m.name.clone(),
                description: m.description.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct SetModulePermissionsRequest {
    pub permission_kind_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 50, message = "Role name must be 1-50 characters"))]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 255, message = "Description must be at most 255 characters"))]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct GrantInput {
    pub module_id: i64,

    #[validate(length(min = 1, message = "At least one permission kind is required"))]
    pub permission_kind_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantPermissionsRequest {
    #[validate(length(min = 1, message = "At least one grant is required"), nested)]
    pub grants: Vec<GrantInput>,
}

impl GrantPermissionsRequest {
    pub fn requests(&self) -> Vec<GrantRequest> {
        self.grants
            .iter()
            .map(|g| GrantRequest {
                module_id: g.module_id,
                permission_kind_ids: g.permission_kind_ids.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleRequest {
    #[validate(range(min = 1, message = "Invalid role id"))]
    pub role_id: i64,
}
