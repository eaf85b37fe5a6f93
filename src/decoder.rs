use crate::abi::InterfaceDescription;
use anyhow::{anyhow, Context, Result};
use ethers::abi::Token;

/// Decodes raw call bytes against an interface.
///
/// Returns the matched function name and its argument tokens in
/// declaration order.
pub trait AbiDecoder: Send + Sync {
    fn decode_call(
        &self,
        iface: &InterfaceDescription,
        data: &[u8],
    ) -> Result<(String, Vec<Token>)>;
}

/// Selector-matching decoder backed by `ethers::abi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthersAbiDecoder;

impl AbiDecoder for EthersAbiDecoder {
    fn decode_call(
        &self,
        iface: &InterfaceDescription,
        data: &[u8],
    ) -> Result<(String, Vec<Token>)> {
        if data.len() < 4 {
            return Err(anyhow!(
                "call data is {} bytes, shorter than a function selector",
                data.len()
            ));
        }
        let (selector, args) = data.split_at(4);

        let function = iface
            .abi
            .functions()
            .find(|f| f.short_signature().as_slice() == selector)
            .ok_or_else(|| anyhow!("no function with selector 0x{}", hex::encode(selector)))?;

        let tokens = function
            .decode_input(args)
            .with_context(|| format!("failed to decode arguments of {}", function.signature()))?;

        Ok((function.name.clone(), tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiEncode;
    use ethers::types::{Address, U256};

    fn erc20() -> InterfaceDescription {
        InterfaceDescription::from_human_readable(&[
            "function transfer(address to, uint256 amount) returns (bool)",
            "function approve(address spender, uint256 amount) returns (bool)",
        ])
        .unwrap()
    }

    fn transfer_calldata(to: Address, amount: U256) -> Vec<u8> {
        let mut data = hex::decode("a9059cbb").unwrap();
        data.extend_from_slice(&(to, amount).encode());
        data
    }

    #[test]
    fn decodes_by_selector() {
        let to = Address::repeat_byte(0x11);
        let data = transfer_calldata(to, U256::from(1_000_000));

        let (name, tokens) = EthersAbiDecoder.decode_call(&erc20(), &data).unwrap();
        assert_eq!(name, "transfer");
        assert_eq!(
            tokens,
            vec![Token::Address(to), Token::Uint(U256::from(1_000_000))]
        );
    }

    #[test]
    fn unknown_selector_is_an_error() {
        let data = hex::decode("deadbeef").unwrap();
        let err = EthersAbiDecoder.decode_call(&erc20(), &data).unwrap_err();
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn short_data_is_an_error() {
        assert!(EthersAbiDecoder.decode_call(&erc20(), &[0xa9, 0x05]).is_err());
    }

    #[test]
    fn truncated_arguments_are_an_error() {
        let mut data = transfer_calldata(Address::zero(), U256::one());
        data.truncate(20);
        assert!(EthersAbiDecoder.decode_call(&erc20(), &data).is_err());
    }
}
