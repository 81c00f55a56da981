use std::path::PathBuf;

const FLEETWATCH_CONFIG: &str = "FLEETWATCH_CONFIG";

const DEFAULT_CONFIG: &str = "./fleetwatch.json";

pub fn get_config_path() -> String {
    std::env::var(FLEETWATCH_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const FLEETWATCH_INVENTORY: &str = "FLEETWATCH_INVENTORY";

/// Inventory path override, if set
pub fn get_inventory_override() -> Option<PathBuf> {
    std::env::var(FLEETWATCH_INVENTORY)
        .ok()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

const FLEETWATCH_HOST_PASSWORD: &str = "FLEETWATCH_HOST_PASSWORD";

/// Login secret written into new inventory entries when none is given
pub fn get_host_password() -> Option<String> {
    std::env::var(FLEETWATCH_HOST_PASSWORD).ok()
}
