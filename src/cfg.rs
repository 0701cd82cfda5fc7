//! The fixed network table and the node's on-disk locations.

use std::{env, path::PathBuf};

use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use strum::EnumProperty;
use strum_macros::{Display, EnumString};

/// Names the coordination contract when running against `local`.
pub const LOCAL_CONTRACT_ENV: &str = "LLM_SERVICE_CONTRACT";
/// Overrides the directory the event cursor is persisted in.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Display, EnumString, EnumProperty)]
pub enum Network {
    #[value(name = "local")]
    #[strum(
        serialize = "local",
        props(rpc = "http://localhost:8545", wss = "ws://localhost:8545")
    )]
    Local,
    #[value(name = "sepolia")]
    #[strum(
        serialize = "sepolia",
        props(
            rpc = "https://ethereum-sepolia-rpc.publicnode.com",
            wss = "wss://ethereum-sepolia-rpc.publicnode.com",
            contract = "0x91efB0b7770D1a02Ae1c1eBcDBbC2bC8FbE962c3"
        )
    )]
    Sepolia,
    #[value(name = "base-sepolia")]
    #[strum(
        serialize = "base-sepolia",
        props(
            rpc = "https://sepolia.base.org",
            wss = "wss://base-sepolia-rpc.publicnode.com",
            contract = "0x7C0bfBA2Fd2Faa4C9eD37F7b36AcA3e4b2a89Dd1"
        )
    )]
    BaseSepolia,
}

impl Network {
    pub fn rpc_url(&self) -> &'static str {
        self.get_str("rpc").expect("every network has an rpc endpoint")
    }

    pub fn wss_url(&self) -> Option<&'static str> {
        self.get_str("wss")
    }

    /// The endpoint the node connects to: WebSocket when the network has
    /// one (live logs arrive pushed), HTTP otherwise (live logs are polled).
    pub fn endpoint(&self) -> &'static str {
        self.wss_url().unwrap_or_else(|| self.rpc_url())
    }

    pub fn contract_address(&self) -> Result<Address> {
        let addr = match self.get_str("contract") {
            Some(addr) => addr.to_string(),
            None => env::var(LOCAL_CONTRACT_ENV).map_err(|_| {
                anyhow!("{LOCAL_CONTRACT_ENV} must be set when running against {self}")
            })?,
        };
        addr.parse()
            .with_context(|| format!("invalid contract address {addr}"))
    }
}

/// Directory of the running executable. The wallet and the content store
/// live next to the binary.
pub fn program_dir() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    Ok(exe
        .parent()
        .map(|dir| dir.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Directory the event cursor is persisted in: `CONFIG_PATH` when set, the
/// program directory otherwise.
pub fn config_dir() -> Result<PathBuf> {
    match env::var_os(CONFIG_PATH_ENV) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => program_dir(),
    }
}

pub fn wallet_path() -> Result<PathBuf> {
    Ok(program_dir()?.join("account-evm.data"))
}

pub fn storage_dir() -> Result<PathBuf> {
    Ok(program_dir()?.join("storage-data"))
}

pub fn cursor_path(contract: Address) -> Result<PathBuf> {
    Ok(config_dir()?.join(format!("{contract:#x}.last-processed-block")))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy::primitives::Address;

    use super::Network;

    #[test]
    fn networks_parse_by_name() {
        assert_eq!(Network::from_str("local").unwrap(), Network::Local);
        assert_eq!(Network::from_str("sepolia").unwrap(), Network::Sepolia);
        assert_eq!(
            Network::from_str("base-sepolia").unwrap(),
            Network::BaseSepolia
        );
        assert!(Network::from_str("mainnet-classic").is_err());
    }

    #[test]
    fn public_networks_carry_contract_addresses() {
        assert!(Network::Sepolia.contract_address().is_ok());
        assert!(Network::BaseSepolia.contract_address().is_ok());
    }

    #[test]
    fn endpoint_prefers_websocket() {
        assert!(Network::Sepolia.endpoint().starts_with("wss://"));
        assert!(Network::Local.endpoint().starts_with("ws://"));
    }

    #[test]
    fn cursor_file_name_is_lowercase() {
        let contract = Address::from_str("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        let path = super::cursor_path(contract).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(
            name,
            "0xabcdef0123456789abcdef0123456789abcdef01.last-processed-block"
        );
    }
}
