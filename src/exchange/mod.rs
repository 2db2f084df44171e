//! Exchange-facing types and the connector capability interface
//!
//! The engine never talks wire protocols itself; everything it needs from an
//! exchange comes through the [`ExchangeConnector`] trait and the decoded
//! [`StreamEvent`] payloads defined here.

pub mod paper;
pub mod traits;

pub use paper::PaperExchange;
pub use traits::{EventStream, ExchangeConnector};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Asset class a pair trades under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    /// Spot markets
    Spot,
    /// Margin markets
    Margin,
    /// Futures markets
    Futures,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Spot => write!(f, "spot"),
            AssetClass::Margin => write!(f, "margin"),
            AssetClass::Futures => write!(f, "futures"),
        }
    }
}

/// A currency code such as `BTC` or `USDT`, normalized to uppercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a currency code, normalizing to uppercase
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }

    /// The normalized code
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(code: &str) -> Self {
        Currency::new(code)
    }
}

/// A tradable market pair, base quoted in quote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    /// Base currency
    pub base: Currency,
    /// Quote currency
    pub quote: Currency,
}

impl Pair {
    /// Create a pair from base and quote codes
    pub fn new(base: impl Into<Currency>, quote: impl Into<Currency>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order accepted, not yet filled
    New,
    /// Order partially filled
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order rejected by the exchange
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// An order submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSubmission {
    /// Market pair
    pub pair: Pair,
    /// Asset class
    pub asset_class: AssetClass,
    /// Order side
    pub side: OrderSide,
    /// Quantity in base units
    pub amount: f64,
    /// Limit price in quote units
    pub price: f64,
    /// Optional client-assigned id
    pub client_order_id: Option<String>,
}

/// The exchange's answer to a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Exchange-assigned order identifier
    pub order_id: String,
    /// Whether the order was accepted
    pub placed: bool,
    /// Market pair
    pub pair: Pair,
    /// Order side
    pub side: OrderSide,
    /// Quantity in base units
    pub amount: f64,
    /// Limit price in quote units
    pub price: f64,
    /// Acceptance timestamp
    pub timestamp: DateTime<Utc>,
}

/// A decoded last-trade ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    /// Market pair
    pub pair: Pair,
    /// Last trade price
    pub last: f64,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// When the exchange produced this quote
    pub last_updated: DateTime<Utc>,
}

/// Full order state as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    /// Exchange-assigned order identifier
    pub order_id: String,
    /// Market pair
    pub pair: Pair,
    /// Order side
    pub side: OrderSide,
    /// Current status
    pub status: OrderStatus,
    /// Limit price
    pub price: f64,
    /// Original quantity
    pub amount: f64,
    /// Executed quantity so far
    pub executed: f64,
    /// Exchange timestamp of this state
    pub date: DateTime<Utc>,
}

/// A requested or reported order modification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderModify {
    /// Exchange-assigned order identifier
    pub order_id: String,
    /// Market pair
    pub pair: Pair,
    /// Asset class
    pub asset_class: AssetClass,
    /// Order side
    pub side: OrderSide,
    /// New limit price
    pub price: f64,
    /// New quantity
    pub amount: f64,
}

/// An account balance delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account the change applies to
    pub account: String,
    /// Asset class
    pub asset_class: AssetClass,
    /// Affected currency
    pub currency: Currency,
    /// New total amount
    pub amount: f64,
}

/// A decoded candlestick update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineData {
    /// Market pair
    pub pair: Pair,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Base volume
    pub volume: f64,
    /// Candle timestamp
    pub timestamp: DateTime<Utc>,
}

/// A funding-rate update for perpetual markets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingData {
    /// Market pair
    pub pair: Pair,
    /// Funding rate
    pub rate: f64,
    /// Funding timestamp
    pub timestamp: DateTime<Utc>,
}

/// An order-book snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Market pair
    pub pair: Pair,
    /// Bid levels, best first, as (price, quantity)
    pub bids: Vec<(f64, f64)>,
    /// Ask levels, best first, as (price, quantity)
    pub asks: Vec<(f64, f64)>,
    /// Snapshot timestamp
    pub last_updated: DateTime<Utc>,
}

/// A public trade print
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeData {
    /// Market pair
    pub pair: Pair,
    /// Trade price
    pub price: f64,
    /// Trade quantity
    pub amount: f64,
    /// Taker side
    pub side: OrderSide,
    /// Trade timestamp
    pub timestamp: DateTime<Utc>,
}

/// An execution against one of our orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillData {
    /// Exchange-assigned order identifier
    pub order_id: String,
    /// Market pair
    pub pair: Pair,
    /// Fill price
    pub price: f64,
    /// Fill quantity
    pub amount: f64,
    /// Fill timestamp
    pub timestamp: DateTime<Utc>,
}

/// A decode failure reported by the connector.
///
/// A well-formed classification error always carries the underlying cause;
/// one without a cause violates the decode contract and is treated as fatal
/// by the router.
#[derive(Debug)]
pub struct ClassificationError {
    /// Human-readable context, e.g. the offending channel name
    pub context: String,
    /// The decode failure itself
    pub source: Option<anyhow::Error>,
}

/// One decoded event from an exchange stream
#[derive(Debug)]
pub enum StreamEvent {
    /// Funding-rate update
    Funding(FundingData),
    /// Last-trade ticker
    Price(Ticker),
    /// Candlestick update
    Kline(KlineData),
    /// Order-book snapshot
    OrderBook(OrderBookSnapshot),
    /// Order state change for one of our orders
    Order(OrderDetail),
    /// Order modification notice
    Modify(OrderModify),
    /// Account balance delta
    BalanceChange(BalanceChange),
    /// Public trade prints
    Trades(Vec<TradeData>),
    /// Executions against our orders
    Fills(Vec<FillData>),
    /// Decode failure from the connector
    ClassificationError(ClassificationError),
    /// Message the connector recognized but has no decoder for
    UnhandledWarning(String),
    /// Payload that did not classify as anything above
    Unknown(serde_json::Value),
}

/// Balance of one currency inside a sub-account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    /// Currency code
    pub currency: Currency,
    /// Total amount held
    pub total: f64,
    /// Amount locked in open orders
    pub hold: f64,
}

/// One sub-account and its balances per asset class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubAccount {
    /// Account identifier
    pub id: String,
    /// Balances keyed by asset class, then currency
    pub balances: HashMap<AssetClass, HashMap<Currency, CurrencyBalance>>,
}

/// All holdings reported by one exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeHoldings {
    /// Sub-accounts keyed by account id
    pub accounts: HashMap<String, SubAccount>,
}

impl ExchangeHoldings {
    /// Create empty holdings
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the balance of `code` in account `account_id` under `asset`
    pub fn currency_balance(
        &self,
        exchange: &str,
        account_id: &str,
        code: &Currency,
        asset: AssetClass,
    ) -> crate::Result<CurrencyBalance> {
        let missing = || crate::EngineError::CurrencyNotFound {
            exchange: exchange.to_string(),
            code: code.to_string(),
        };
        let account = self.accounts.get(account_id).ok_or_else(missing)?;
        let balance = account
            .balances
            .get(&asset)
            .and_then(|per_currency| per_currency.get(code))
            .ok_or_else(missing)?;
        Ok(balance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalization() {
        assert_eq!(Currency::new("btc"), Currency::new(" BTC "));
        assert_eq!(Currency::new("eth").as_str(), "ETH");
    }

    #[test]
    fn test_pair_display() {
        assert_eq!(Pair::new("BTC", "USDT").to_string(), "BTC-USDT");
    }

    #[test]
    fn test_order_side_display() {
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_holdings_lookup() {
        let mut holdings = ExchangeHoldings::new();
        let mut account = SubAccount {
            id: "main".to_string(),
            ..Default::default()
        };
        account.balances.entry(AssetClass::Spot).or_default().insert(
            Currency::new("BTC"),
            CurrencyBalance {
                currency: Currency::new("BTC"),
                total: 1.5,
                hold: 0.25,
            },
        );
        holdings.accounts.insert("main".to_string(), account);

        let found = holdings
            .currency_balance("paper", "main", &Currency::new("BTC"), AssetClass::Spot)
            .unwrap();
        assert_eq!(found.total, 1.5);

        let missing =
            holdings.currency_balance("paper", "main", &Currency::new("XMR"), AssetClass::Spot);
        assert!(missing.is_err());
    }
}
