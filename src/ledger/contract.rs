// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! Marketplace contract interface and event decoding.

use alloy::primitives::{Address, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;

// The deployed data-asset marketplace interface. Asset ids are assigned by
// the contract and announced through the AssetCreated event; they are never
// chosen client-side.
sol! {
    interface IDataMarket {
        event AssetCreated(uint256 indexed assetId, address indexed owner);
        event AssetPurchased(uint256 indexed assetId, address indexed buyer, uint256 price);

        function createAsset(string contentRef, uint256 price) external;
        function purchaseAsset(uint256 assetId, bytes proof) external payable;
        function removeAsset(uint256 assetId) external;
        function withdraw() external;

        function checkOwnership(uint256 assetId, address claimant) external view returns (bool);
        function ownerOf(uint256 assetId) external view returns (address);
        function assetPrice(uint256 assetId) external view returns (uint256);
        function pendingRevenue(address seller) external view returns (uint256);
    }
}

/// Find and decode the `AssetCreated` event emitted by `contract`.
///
/// Returns `None` when the receipt carries no such event; the caller must
/// treat that as a failure even for a mined transaction.
pub fn creation_event(logs: &[Log], contract: Address) -> Option<IDataMarket::AssetCreated> {
    logs.iter()
        .filter(|log| log.address == contract)
        .find_map(|log| IDataMarket::AssetCreated::decode_log(log).ok())
        .map(|decoded| decoded.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn market_address() -> Address {
        Address::repeat_byte(0x42)
    }

    fn created_log(contract: Address, asset_id: u64, owner: Address) -> Log {
        let event = IDataMarket::AssetCreated {
            assetId: U256::from(asset_id),
            owner,
        };
        Log {
            address: contract,
            data: event.encode_log_data(),
        }
    }

    #[test]
    fn creation_event_roundtrips() {
        let owner = Address::repeat_byte(0x11);
        let logs = vec![created_log(market_address(), 7, owner)];

        let event = creation_event(&logs, market_address()).unwrap();
        assert_eq!(event.assetId, U256::from(7));
        assert_eq!(event.owner, owner);
    }

    #[test]
    fn creation_event_ignores_other_contracts() {
        let owner = Address::repeat_byte(0x11);
        let logs = vec![created_log(Address::repeat_byte(0x99), 7, owner)];

        assert!(creation_event(&logs, market_address()).is_none());
    }

    #[test]
    fn creation_event_ignores_other_events() {
        let event = IDataMarket::AssetPurchased {
            assetId: U256::from(3),
            buyer: Address::repeat_byte(0x22),
            price: U256::from(100),
        };
        let logs = vec![Log {
            address: market_address(),
            data: event.encode_log_data(),
        }];

        assert!(creation_event(&logs, market_address()).is_none());
    }

    #[test]
    fn missing_event_yields_none() {
        assert!(creation_event(&[], market_address()).is_none());
    }
}
