//! Open offers owned by this node and the edit entry point.

pub mod validator;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trade::store::SqliteTradeStore;

pub use validator::{EditOfferValidator, OfferEditError, validate_edit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenOfferState {
    Available,
    Deactivated,
}

impl OpenOfferState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Deactivated => "deactivated",
        }
    }
}

impl FromStr for OpenOfferState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "deactivated" => Ok(Self::Deactivated),
            other => anyhow::bail!("unknown offer state: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOffer {
    pub id: String,
    pub use_market_based_price: bool,
    /// Zero while the offer is market based.
    pub fixed_price: Decimal,
    /// Percentage offset from the market price; zero for fixed-price offers.
    pub market_price_margin: f64,
    /// Price at which a market-based offer deactivates itself; zero when unset.
    pub trigger_price: i64,
    pub state: OpenOfferState,
}

impl OpenOffer {
    pub fn fixed(id: impl Into<String>, price: Decimal) -> Self {
        Self {
            id: id.into(),
            use_market_based_price: false,
            fixed_price: price,
            market_price_margin: 0.0,
            trigger_price: 0,
            state: OpenOfferState::Available,
        }
    }

    pub fn market_based(id: impl Into<String>, margin: f64, trigger_price: i64) -> Self {
        Self {
            id: id.into(),
            use_market_based_price: true,
            fixed_price: Decimal::ZERO,
            market_price_margin: margin,
            trigger_price,
            state: OpenOfferState::Available,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.state == OpenOfferState::Available
    }
}

/// Which subset of an offer's fields an edit request changes.
///
/// Discriminants follow the wire protocol's `EditType` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    ActivationStateOnly = 0,
    FixedPriceOnly = 1,
    FixedPriceAndActivationState = 2,
    MktPriceMarginOnly = 3,
    MktPriceMarginAndActivationState = 4,
    TriggerPriceOnly = 5,
    TriggerPriceAndActivationState = 6,
    MktPriceMarginAndTriggerPrice = 7,
    MktPriceMarginAndTriggerPriceAndActivationState = 8,
}

impl EditType {
    pub const ALL: [EditType; 9] = [
        Self::ActivationStateOnly,
        Self::FixedPriceOnly,
        Self::FixedPriceAndActivationState,
        Self::MktPriceMarginOnly,
        Self::MktPriceMarginAndActivationState,
        Self::TriggerPriceOnly,
        Self::TriggerPriceAndActivationState,
        Self::MktPriceMarginAndTriggerPrice,
        Self::MktPriceMarginAndTriggerPriceAndActivationState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActivationStateOnly => "activation-state-only",
            Self::FixedPriceOnly => "fixed-price-only",
            Self::FixedPriceAndActivationState => "fixed-price-and-activation-state",
            Self::MktPriceMarginOnly => "mkt-price-margin-only",
            Self::MktPriceMarginAndActivationState => "mkt-price-margin-and-activation-state",
            Self::TriggerPriceOnly => "trigger-price-only",
            Self::TriggerPriceAndActivationState => "trigger-price-and-activation-state",
            Self::MktPriceMarginAndTriggerPrice => "mkt-price-margin-and-trigger-price",
            Self::MktPriceMarginAndTriggerPriceAndActivationState => {
                "mkt-price-margin-and-trigger-price-and-activation-state"
            }
        }
    }

    pub fn changes_activation_state(self) -> bool {
        matches!(
            self,
            Self::ActivationStateOnly
                | Self::FixedPriceAndActivationState
                | Self::MktPriceMarginAndActivationState
                | Self::TriggerPriceAndActivationState
                | Self::MktPriceMarginAndTriggerPriceAndActivationState
        )
    }

    pub fn changes_fixed_price(self) -> bool {
        matches!(
            self,
            Self::FixedPriceOnly | Self::FixedPriceAndActivationState
        )
    }

    pub fn changes_market_price_margin(self) -> bool {
        matches!(
            self,
            Self::MktPriceMarginOnly
                | Self::MktPriceMarginAndActivationState
                | Self::MktPriceMarginAndTriggerPrice
                | Self::MktPriceMarginAndTriggerPriceAndActivationState
        )
    }

    pub fn changes_trigger_price(self) -> bool {
        matches!(
            self,
            Self::TriggerPriceOnly
                | Self::TriggerPriceAndActivationState
                | Self::MktPriceMarginAndTriggerPrice
                | Self::MktPriceMarginAndTriggerPriceAndActivationState
        )
    }
}

impl fmt::Display for EditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditType {
    type Err = OfferEditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| OfferEditError::UnknownEditTypeName {
                name: s.to_string(),
            })
    }
}

impl TryFrom<i32> for EditType {
    type Error = OfferEditError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| *t as i32 == value)
            .ok_or(OfferEditError::UnknownEditType { value })
    }
}

/// A proposed change to an open offer.
///
/// Values outside the subset selected by `edit_type` must hold their
/// no-change sentinel: `"0"` (or empty) for the price text, zero for numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOfferRequest {
    pub edit_type: EditType,
    pub edited_fixed_price_text: String,
    pub edited_use_market_based_price: bool,
    pub edited_market_price_margin: f64,
    pub edited_trigger_price: i64,
    /// New activation state; only read for edit types that change it.
    pub enable: Option<bool>,
}

impl EditOfferRequest {
    pub fn new(edit_type: EditType) -> Self {
        Self {
            edit_type,
            edited_fixed_price_text: "0".to_string(),
            edited_use_market_based_price: false,
            edited_market_price_margin: 0.0,
            edited_trigger_price: 0,
            enable: None,
        }
    }
}

/// The node's open offers, optionally backed by the SQLite store.
#[derive(Debug, Default)]
pub struct OpenOfferBook {
    offers: Mutex<HashMap<String, OpenOffer>>,
    store: Option<Arc<Mutex<SqliteTradeStore>>>,
}

impl OpenOfferBook {
    /// An in-memory book; nothing survives a restart.
    pub fn new() -> Self {
        Self::default()
    }

    /// A book that writes every added or edited offer to `store`, starting
    /// from the offers already stored there.
    pub fn open(store: Arc<Mutex<SqliteTradeStore>>) -> Result<Self> {
        let stored = store
            .lock()
            .expect("store mutex poisoned")
            .list_offers()
            .context("list stored offers")?;
        let offers = stored
            .into_iter()
            .map(|offer| (offer.id.clone(), offer))
            .collect();
        Ok(Self {
            offers: Mutex::new(offers),
            store: Some(store),
        })
    }

    pub fn add_offer(&self, offer: OpenOffer) -> Result<()> {
        let mut offers = self.offers.lock().expect("offers mutex poisoned");
        self.persist(&offer)
            .with_context(|| format!("persist offer {}", offer.id))?;
        offers.insert(offer.id.clone(), offer);
        Ok(())
    }

    pub fn get_offer(&self, offer_id: &str) -> Option<OpenOffer> {
        self.offers
            .lock()
            .expect("offers mutex poisoned")
            .get(offer_id)
            .cloned()
    }

    /// Validates `request` against the current offer and commits it.
    ///
    /// Nothing is changed when validation fails.
    pub fn edit_offer(
        &self,
        offer_id: &str,
        request: &EditOfferRequest,
    ) -> Result<OpenOffer, OfferEditError> {
        let mut offers = self.offers.lock().expect("offers mutex poisoned");
        let offer = offers
            .get_mut(offer_id)
            .ok_or_else(|| OfferEditError::OfferNotFound {
                offer_id: offer_id.to_string(),
            })?;

        let validator = EditOfferValidator::new(offer, request)?;
        validator.validate()?;
        let edited = validator.apply()?;
        self.persist(&edited)
            .map_err(|e| OfferEditError::Persist {
                offer_id: edited.id.clone(),
                reason: format!("{e:#}"),
            })?;

        tracing::info!(
            offer_id = %edited.id,
            edit_type = %request.edit_type,
            use_market_based_price = edited.use_market_based_price,
            activated = edited.is_activated(),
            "edited offer"
        );
        *offer = edited.clone();
        Ok(edited)
    }

    fn persist(&self, offer: &OpenOffer) -> Result<()> {
        match &self.store {
            Some(store) => store
                .lock()
                .expect("store mutex poisoned")
                .upsert_offer(offer),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_type_wire_values_and_names() {
        for (i, edit_type) in EditType::ALL.into_iter().enumerate() {
            assert_eq!(EditType::try_from(i as i32), Ok(edit_type));
            assert_eq!(edit_type.as_str().parse::<EditType>(), Ok(edit_type));
        }
        assert_eq!(
            EditType::try_from(9),
            Err(OfferEditError::UnknownEditType { value: 9 })
        );
        assert_eq!(
            "FIXED_PRICE_ONLY".parse::<EditType>(),
            Ok(EditType::FixedPriceOnly)
        );
        assert!("everything".parse::<EditType>().is_err());
    }

    #[test]
    fn rejected_edit_leaves_offer_untouched() {
        let book = OpenOfferBook::new();
        let offer = OpenOffer::market_based("offer-book", 1.0, 25_000);
        book.add_offer(offer.clone()).unwrap();

        let mut request = EditOfferRequest::new(EditType::MktPriceMarginOnly);
        request.edited_use_market_based_price = true;
        request.edited_market_price_margin = 3.0;
        request.edited_fixed_price_text = "100".to_string();
        assert!(book.edit_offer("offer-book", &request).is_err());
        assert_eq!(book.get_offer("offer-book"), Some(offer));

        request.edited_fixed_price_text = "0".to_string();
        let edited = book.edit_offer("offer-book", &request).unwrap();
        assert_eq!(edited.market_price_margin, 3.0);
        assert_eq!(edited.trigger_price, 25_000);
        assert_eq!(book.get_offer("offer-book"), Some(edited));

        assert_eq!(
            book.edit_offer("missing", &request),
            Err(OfferEditError::OfferNotFound {
                offer_id: "missing".to_string()
            })
        );
    }
}
