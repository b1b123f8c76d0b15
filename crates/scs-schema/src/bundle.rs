use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown bundle '{0}'")]
pub struct UnknownBundle(pub String);

/// Backing technology of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentBundle {
    Sql,
    Triplestore,
    Filesystem,
    WisskiApp,
    JupyterApp,
    NextcloudApp,
}

impl ComponentBundle {
    pub const ALL: [ComponentBundle; 6] = [
        ComponentBundle::Sql,
        ComponentBundle::Triplestore,
        ComponentBundle::Filesystem,
        ComponentBundle::WisskiApp,
        ComponentBundle::JupyterApp,
        ComponentBundle::NextcloudApp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentBundle::Sql => "sql",
            ComponentBundle::Triplestore => "triplestore",
            ComponentBundle::Filesystem => "filesystem",
            ComponentBundle::WisskiApp => "wisski-app",
            ComponentBundle::JupyterApp => "jupyter-app",
            ComponentBundle::NextcloudApp => "nextcloud-app",
        }
    }

    /// The stack phase a component of this bundle is provisioned in.
    pub fn phase(self) -> Phase {
        match self {
            ComponentBundle::Sql => Phase::Sql,
            ComponentBundle::Triplestore => Phase::Triplestore,
            ComponentBundle::Filesystem => Phase::Filesystem,
            ComponentBundle::WisskiApp
            | ComponentBundle::JupyterApp
            | ComponentBundle::NextcloudApp => Phase::Application,
        }
    }

    pub fn is_application(self) -> bool {
        self.phase() == Phase::Application
    }
}

impl fmt::Display for ComponentBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentBundle {
    type Err = UnknownBundle;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentBundle::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| UnknownBundle(s.to_owned()))
    }
}

/// Flavour of a composite stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackBundle {
    Wisski,
    Jupyter,
    Nextcloud,
}

impl StackBundle {
    pub const ALL: [StackBundle; 3] = [
        StackBundle::Wisski,
        StackBundle::Jupyter,
        StackBundle::Nextcloud,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StackBundle::Wisski => "wisski",
            StackBundle::Jupyter => "jupyter",
            StackBundle::Nextcloud => "nextcloud",
        }
    }

    /// Member components in creation order.
    pub fn members(self) -> &'static [ComponentBundle] {
        match self {
            StackBundle::Wisski => &[
                ComponentBundle::Sql,
                ComponentBundle::Triplestore,
                ComponentBundle::WisskiApp,
            ],
            StackBundle::Jupyter => &[ComponentBundle::Filesystem, ComponentBundle::JupyterApp],
            StackBundle::Nextcloud => &[
                ComponentBundle::Sql,
                ComponentBundle::Filesystem,
                ComponentBundle::NextcloudApp,
            ],
        }
    }
}

impl fmt::Display for StackBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackBundle {
    type Err = UnknownBundle;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StackBundle::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| UnknownBundle(s.to_owned()))
    }
}

/// One ordered step of composite creation/deletion.
///
/// The derived `Ord` is the creation order; deletion walks it in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Sql,
    Triplestore,
    Filesystem,
    Application,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Sql => "sql",
            Phase::Triplestore => "triplestore",
            Phase::Filesystem => "filesystem",
            Phase::Application => "application",
        }
    }

    /// Key used for this phase in serialized reports, e.g. `sqlResult`.
    pub fn result_key(self) -> &'static str {
        match self {
            Phase::Sql => "sqlResult",
            Phase::Triplestore => "triplestoreResult",
            Phase::Filesystem => "filesystemResult",
            Phase::Application => "applicationResult",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_bundle_parse_roundtrip() {
        for bundle in ComponentBundle::ALL {
            assert_eq!(bundle.as_str().parse::<ComponentBundle>().unwrap(), bundle);
        }
        assert_eq!(
            "mongo".parse::<ComponentBundle>(),
            Err(UnknownBundle("mongo".to_owned()))
        );
    }

    #[test]
    fn component_bundle_serde_is_kebab_case() {
        let json = serde_json::to_string(&ComponentBundle::WisskiApp).unwrap();
        assert_eq!(json, "\"wisski-app\"");
    }

    #[test]
    fn stack_members_are_in_phase_order() {
        for stack in StackBundle::ALL {
            let phases: Vec<Phase> = stack.members().iter().map(|b| b.phase()).collect();
            let mut sorted = phases.clone();
            sorted.sort();
            assert_eq!(phases, sorted, "{stack} members out of order");
            assert_eq!(phases.last(), Some(&Phase::Application));
        }
    }

    #[test]
    fn wisski_stack_members() {
        assert_eq!(
            StackBundle::Wisski.members(),
            &[
                ComponentBundle::Sql,
                ComponentBundle::Triplestore,
                ComponentBundle::WisskiApp
            ]
        );
    }

    #[test]
    fn phase_order() {
        assert!(Phase::Sql < Phase::Triplestore);
        assert!(Phase::Triplestore < Phase::Filesystem);
        assert!(Phase::Filesystem < Phase::Application);
    }

    #[test]
    fn unknown_stack_bundle() {
        assert!("drupal".parse::<StackBundle>().is_err());
    }
}
