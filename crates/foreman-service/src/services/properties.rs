//! Properties service: key/value pairs builds can read at step time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::service::ReconfigurableService;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertiesArgs {
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertiesState {
    pub properties: BTreeMap<String, String>,
}

impl PropertiesState {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

pub struct PropertiesService;

impl ReconfigurableService for PropertiesService {
    type Args = PropertiesArgs;
    type State = PropertiesState;

    fn construct(_name: &str, _args: &PropertiesArgs) -> Result<Self, ServiceError> {
        Ok(Self)
    }

    fn reconfigure(
        &self,
        _current: Option<&PropertiesState>,
        args: PropertiesArgs,
    ) -> Result<PropertiesState, ServiceError> {
        if let Some(key) = args.properties.keys().find(|k| k.trim().is_empty()) {
            return Err(ServiceError::Reconfigure(format!(
                "property name must not be blank: {:?}",
                key
            )));
        }
        Ok(PropertiesState {
            properties: args.properties,
        })
    }
}
