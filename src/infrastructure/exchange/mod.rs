//! `ExchangeClient` adapters: one live venue adapter plus a deterministic in-memory mock,
//! mirroring the teacher's split between `infrastructure::binance` and `infrastructure::mock`.

pub mod mock;
pub mod okx;

pub use mock::MockExchangeClient;
pub use okx::OkxExchangeClient;

/// Converts the internal `BASE/QUOTE:SETTLE` symbol form into the venue's dashed
/// perpetual-swap instrument id, e.g. `BTC/USDT:USDT` -> `BTC-USDT-SWAP` (§6).
pub fn to_inst_id(symbol: &str) -> String {
    let base_quote = symbol.split(':').next().unwrap_or(symbol);
    format!("{}-SWAP", base_quote.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_internal_symbol_to_dashed_swap_id() {
        assert_eq!(to_inst_id("BTC/USDT:USDT"), "BTC-USDT-SWAP");
        assert_eq!(to_inst_id("PEPE/USDT:USDT"), "PEPE-USDT-SWAP");
    }
}
