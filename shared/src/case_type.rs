use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use crate::event::{CaseTypeId, StageId};
use crate::params::ParamMap;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaseTypeError {
    #[error("Case type id cannot be empty")]
    EmptyId,
    #[error("Case type {0} declares no stages")]
    NoStages(CaseTypeId),
    #[error("Case type {type_id} declares stage {stage} twice")]
    DuplicateStage { type_id: CaseTypeId, stage: StageId },
    #[error("Stage {stage} requires {prerequisite}, which is not an earlier stage")]
    UnknownPrerequisite {
        stage: StageId,
        prerequisite: StageId,
    },
    #[error("Parameter {param} is declared by more than one stage")]
    DuplicateParam { param: String },
    #[error("Case type {0} is already registered")]
    DuplicateType(CaseTypeId),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    pub id: StageId,
    pub display_name: String,
    /// Remote application invoked to run this stage.
    pub app_id: String,
    #[serde(default)]
    pub prerequisites: Vec<StageId>,
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
}

impl StageDescriptor {
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// Static stage schema for one kind of case. Stages are listed in
/// execution order and may only depend on stages listed before them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CaseTypeDescriptor {
    pub id: CaseTypeId,
    pub display_name: String,
    pub stages: Vec<StageDescriptor>,
}

impl CaseTypeDescriptor {
    pub fn validate(&self) -> Result<(), CaseTypeError> {
        if self.id.as_str().trim().is_empty() {
            return Err(CaseTypeError::EmptyId);
        }
        if self.stages.is_empty() {
            return Err(CaseTypeError::NoStages(self.id.clone()));
        }

        let mut seen_stages: BTreeSet<&StageId> = BTreeSet::new();
        let mut seen_params: BTreeSet<&str> = BTreeSet::new();
        for stage in &self.stages {
            for prerequisite in &stage.prerequisites {
                if !seen_stages.contains(prerequisite) {
                    return Err(CaseTypeError::UnknownPrerequisite {
                        stage: stage.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
            if !seen_stages.insert(&stage.id) {
                return Err(CaseTypeError::DuplicateStage {
                    type_id: self.id.clone(),
                    stage: stage.id.clone(),
                });
            }
            for param in &stage.params {
                if !seen_params.insert(param.name.as_str()) {
                    return Err(CaseTypeError::DuplicateParam {
                        param: param.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn stage(&self, id: &StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| &s.id == id)
    }

    #[must_use]
    pub fn is_stage_name(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.id.as_str() == name)
    }

    /// Stage that declares the parameter `name`.
    #[must_use]
    pub fn param_owner(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages
            .iter()
            .find(|s| s.params.iter().any(|p| p.name == name))
    }

    /// Declared defaults, written into the parameter document of a new case.
    #[must_use]
    pub fn initial_params(&self) -> ParamMap {
        self.stages
            .iter()
            .flat_map(|s| s.params.iter())
            .filter_map(|p| p.default.as_ref().map(|d| (p.name.clone(), d.clone())))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaseTypeCatalog {
    types: Vec<Arc<CaseTypeDescriptor>>,
}

impl CaseTypeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: CaseTypeDescriptor) -> Result<(), CaseTypeError> {
        descriptor.validate()?;
        if self.get(&descriptor.id).is_some() {
            return Err(CaseTypeError::DuplicateType(descriptor.id));
        }
        self.types.push(Arc::new(descriptor));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &CaseTypeId) -> Option<Arc<CaseTypeDescriptor>> {
        self.types.iter().find(|t| &t.id == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaseTypeDescriptor> {
        self.types.iter().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
