use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyInvariantError {
    #[error("{role} count must be > 0")]
    ZeroCount { role: String },
    #[error("{role} declares {names} names for {count} nodes")]
    NameCountMismatch {
        role: String,
        names: usize,
        count: usize,
    },
    #[error("duplicate node name '{name}'")]
    DuplicateName { name: String },
    #[error("duplicate {role} index {index}")]
    DuplicateIndex { role: String, index: usize },
    #[error("node name must not be empty")]
    EmptyName,
}

/// Validate a role group's declared count against its optional explicit
/// names.
pub fn validate_group_shape(
    role: &str,
    count: usize,
    names: Option<&[String]>,
) -> Result<(), TopologyInvariantError> {
    if count == 0 {
        return Err(TopologyInvariantError::ZeroCount {
            role: role.to_owned(),
        });
    }

    if let Some(names) = names {
        if names.len() != count {
            return Err(TopologyInvariantError::NameCountMismatch {
                role: role.to_owned(),
                names: names.len(),
                count,
            });
        }
    }

    Ok(())
}

/// Node names are the only handle steps use, so they must be unique across
/// roles.
pub fn validate_unique_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), TopologyInvariantError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(TopologyInvariantError::EmptyName);
        }
        if !seen.insert(name) {
            return Err(TopologyInvariantError::DuplicateName {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

pub fn validate_unique_indices<'a>(
    entries: impl IntoIterator<Item = (&'a str, usize)>,
) -> Result<(), TopologyInvariantError> {
    let mut seen = HashSet::new();
    for (role, index) in entries {
        if !seen.insert((role, index)) {
            return Err(TopologyInvariantError::DuplicateIndex {
                role: role.to_owned(),
                index,
            });
        }
    }
    Ok(())
}
