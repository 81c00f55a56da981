//! In-memory shape of the inventory document
//!
//! ```yaml
//! database_servers:
//!   hosts:
//!     db1:
//!       ansible_host: 10.0.0.5
//!       ansible_user: ansible
//!       ansible_password: secret
//!       ansible_port: 22
//!       ansible_connection: ssh
//! ```
//!
//! Keys this crate does not manage (group `vars`, `children`, per-host extras)
//! are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::storage::MonitoredSystem;
use crate::SystemType;

/// Connection parameters for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostVars {
    pub ansible_host: String,
    pub ansible_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_password: Option<String>,
    pub ansible_port: u16,
    pub ansible_connection: String,

    /// Transport-specific extras (winrm options, become settings, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryGroup {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostVars>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The whole inventory: group name → group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryDocument {
    pub groups: BTreeMap<String, InventoryGroup>,
}

impl InventoryDocument {
    /// Group currently holding `host`, if any
    pub fn group_of(&self, host: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, group)| group.hosts.contains_key(host))
            .map(|(name, _)| name.as_str())
    }

    pub fn host(&self, host: &str) -> Option<&HostVars> {
        self.groups.values().find_map(|group| group.hosts.get(host))
    }

    pub fn hosts_in_group(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|g| g.hosts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every host name, sorted and deduplicated
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .groups
            .values()
            .flat_map(|g| g.hosts.keys().cloned())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Insert an entry, moving the host out of any other group first
    ///
    /// Returns the group the host previously lived in.
    pub fn insert(&mut self, entry: InventoryEntry) -> Option<String> {
        let previous = self.remove(&entry.name).map(|removed| removed.group);

        self.groups
            .entry(entry.group)
            .or_default()
            .hosts
            .insert(entry.name, entry.vars);

        previous
    }

    /// Remove a host from whichever group holds it
    ///
    /// A group left without hosts (and without other managed keys) is
    /// dropped. Returns the removed entry, which `insert` puts back as it was.
    pub fn remove(&mut self, host: &str) -> Option<InventoryEntry> {
        let group_name = self.group_of(host)?.to_string();
        let group = self.groups.get_mut(&group_name)?;
        let vars = group.hosts.remove(host)?;

        if group.hosts.is_empty() && group.extra.is_empty() {
            self.groups.remove(&group_name);
        }

        Some(InventoryEntry {
            name: host.to_string(),
            group: group_name,
            vars,
        })
    }
}

/// Secret material needed to reach a host; never persisted in the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub password: Option<String>,

    /// Privilege escalation method for ssh hosts (`sudo`, `su`)
    pub become_method: Option<String>,
}

/// One host's inventory record
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryEntry {
    pub name: String,
    pub group: String,
    pub vars: HostVars,
}

impl InventoryEntry {
    /// Build the entry for a provisioned system
    ///
    /// Windows hosts always land in `windows_servers` and always use winrm,
    /// whatever transport the profile names. Linux and database hosts are
    /// only ever reached over ssh.
    pub fn for_system(system: &MonitoredSystem, credentials: &Credentials) -> Self {
        let mut extra = BTreeMap::new();

        let connection = match system.system_type {
            SystemType::Windows => {
                extra.insert(
                    "ansible_winrm_server_cert_validation".to_string(),
                    Value::from("ignore"),
                );
                extra.insert("ansible_winrm_transport".to_string(), Value::from("ntlm"));
                "winrm"
            }
            SystemType::Linux | SystemType::Database => {
                if let Some(method) = &credentials.become_method {
                    extra.insert("ansible_become".to_string(), Value::from("yes"));
                    extra.insert(
                        "ansible_become_method".to_string(),
                        Value::from(method.as_str()),
                    );
                    extra.insert("ansible_become_user".to_string(), Value::from("root"));
                }
                "ssh"
            }
        };

        Self {
            name: system.name.clone(),
            group: system.system_type.group_name(),
            vars: HostVars {
                ansible_host: system.address.clone(),
                ansible_user: system.profile.user.clone(),
                ansible_password: credentials.password.clone(),
                ansible_port: system.profile.port,
                ansible_connection: connection.to_string(),
                extra,
            },
        }
    }
}
