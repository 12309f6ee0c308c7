//! Checks that an offer edit request only touches the fields its edit type
//! selects, before anything is committed to the offer.
//!
//! Every rejection here means the caller built a contradictory request; none
//! of them are user input errors.

use std::str::FromStr as _;

use rust_decimal::Decimal;

use super::{EditOfferRequest, EditType, OpenOffer, OpenOfferState};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OfferEditError {
    #[error("offer with id '{offer_id}' not found")]
    OfferNotFound { offer_id: String },

    #[error("unknown edit type {value}")]
    UnknownEditType { value: i32 },

    #[error("unknown edit type '{name}'")]
    UnknownEditTypeName { name: String },

    #[error("invalid fixed price '{text}' for offer with id '{offer_id}'")]
    InvalidFixedPrice { offer_id: String, text: String },

    #[error(
        "programmer error: cannot change fixed price ({fixed_price}), mkt price margin \
         ({market_price_margin}), or trigger price ({trigger_price}) in offer with id \
         '{offer_id}' when only changing activation state"
    )]
    PriceChangeInActivationEdit {
        offer_id: String,
        fixed_price: String,
        market_price_margin: f64,
        trigger_price: i64,
    },

    #[error(
        "programmer error: cannot change fixed price ({fixed_price}) and switch to mkt price \
         margin in offer with id '{offer_id}'"
    )]
    MarketPriceInFixedPriceEdit { offer_id: String, fixed_price: String },

    #[error(
        "programmer error: cannot change trigger price ({trigger_price}) in offer with id \
         '{offer_id}' when changing fixed price"
    )]
    TriggerPriceInFixedPriceEdit { offer_id: String, trigger_price: i64 },

    #[error(
        "programmer error: cannot set a trigger price ({trigger_price}) in fixed price offer \
         with id '{offer_id}'"
    )]
    TriggerPriceOnFixedPriceOffer { offer_id: String, trigger_price: i64 },

    #[error(
        "programmer error: cannot set fixed price ({fixed_price}) in mkt price margin based \
         offer with id '{offer_id}'"
    )]
    FixedPriceInMarketPriceEdit { offer_id: String, fixed_price: String },

    #[error(
        "programmer error: cannot set trigger price ({trigger_price}) to a negative value in \
         offer with id '{offer_id}'"
    )]
    NegativeTriggerPrice { offer_id: String, trigger_price: i64 },

    #[error("fixed price ({fixed_price}) must be positive in offer with id '{offer_id}'")]
    NonPositiveFixedPrice { offer_id: String, fixed_price: String },

    #[error("persist edited offer with id '{offer_id}': {reason}")]
    Persist { offer_id: String, reason: String },

    #[error("edit type {edit_type} for offer with id '{offer_id}' requires an activation state")]
    MissingActivationState {
        offer_id: String,
        edit_type: EditType,
    },
}

impl OfferEditError {
    /// Id of the offer the rejected edit targeted, when known.
    pub fn offer_id(&self) -> Option<&str> {
        match self {
            Self::UnknownEditType { .. } | Self::UnknownEditTypeName { .. } => None,
            Self::OfferNotFound { offer_id }
            | Self::InvalidFixedPrice { offer_id, .. }
            | Self::PriceChangeInActivationEdit { offer_id, .. }
            | Self::MarketPriceInFixedPriceEdit { offer_id, .. }
            | Self::TriggerPriceInFixedPriceEdit { offer_id, .. }
            | Self::TriggerPriceOnFixedPriceOffer { offer_id, .. }
            | Self::FixedPriceInMarketPriceEdit { offer_id, .. }
            | Self::NegativeTriggerPrice { offer_id, .. }
            | Self::NonPositiveFixedPrice { offer_id, .. }
            | Self::Persist { offer_id, .. }
            | Self::MissingActivationState { offer_id, .. } => Some(offer_id),
        }
    }
}

pub struct EditOfferValidator<'a> {
    offer: &'a OpenOffer,
    request: &'a EditOfferRequest,
    edited_fixed_price: Decimal,
}

impl<'a> EditOfferValidator<'a> {
    pub fn new(offer: &'a OpenOffer, request: &'a EditOfferRequest) -> Result<Self, OfferEditError> {
        let text = request.edited_fixed_price_text.trim();
        let edited_fixed_price = if text.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from_str(text).map_err(|_| OfferEditError::InvalidFixedPrice {
                offer_id: offer.id.clone(),
                text: request.edited_fixed_price_text.clone(),
            })?
        };

        Ok(Self {
            offer,
            request,
            edited_fixed_price,
        })
    }

    pub fn validate(&self) -> Result<(), OfferEditError> {
        tracing::info!(
            offer_id = %self.offer.id,
            edit_type = %self.request.edit_type,
            "verifying offer edit params"
        );
        match self.request.edit_type {
            EditType::ActivationStateOnly => self.validate_edited_activation_state(),
            EditType::FixedPriceOnly | EditType::FixedPriceAndActivationState => {
                self.validate_edited_fixed_price()
            }
            EditType::MktPriceMarginOnly
            | EditType::MktPriceMarginAndActivationState
            | EditType::TriggerPriceOnly
            | EditType::TriggerPriceAndActivationState
            | EditType::MktPriceMarginAndTriggerPrice
            | EditType::MktPriceMarginAndTriggerPriceAndActivationState => {
                self.validate_edited_trigger_price()?;
                self.validate_edited_market_price_margin()
            }
        }
    }

    /// The offer as it looks after the edit. Call after [`Self::validate`].
    pub fn apply(&self) -> Result<OpenOffer, OfferEditError> {
        let edit_type = self.request.edit_type;
        let mut edited = self.offer.clone();

        if edit_type.changes_fixed_price() {
            if self.edited_fixed_price <= Decimal::ZERO {
                return Err(OfferEditError::NonPositiveFixedPrice {
                    offer_id: self.offer.id.clone(),
                    fixed_price: self.request.edited_fixed_price_text.clone(),
                });
            }
            edited.use_market_based_price = false;
            edited.fixed_price = self.edited_fixed_price;
            edited.market_price_margin = 0.0;
            edited.trigger_price = 0;
        }

        if edit_type.changes_market_price_margin() {
            edited.use_market_based_price = true;
            edited.fixed_price = Decimal::ZERO;
            edited.market_price_margin = self.request.edited_market_price_margin;
        }

        if edit_type.changes_trigger_price() {
            let trigger_price = self.request.edited_trigger_price;
            if !edited.use_market_based_price && trigger_price != 0 {
                return Err(OfferEditError::TriggerPriceOnFixedPriceOffer {
                    offer_id: self.offer.id.clone(),
                    trigger_price,
                });
            }
            edited.trigger_price = trigger_price;
        }

        if edit_type.changes_activation_state() {
            let enable = self
                .request
                .enable
                .ok_or_else(|| OfferEditError::MissingActivationState {
                    offer_id: self.offer.id.clone(),
                    edit_type,
                })?;
            edited.state = if enable {
                OpenOfferState::Available
            } else {
                OpenOfferState::Deactivated
            };
        }

        Ok(edited)
    }

    fn is_zero_edited_fixed_price(&self) -> bool {
        self.edited_fixed_price.is_zero()
    }

    fn is_zero_edited_market_price_margin(&self) -> bool {
        self.request.edited_market_price_margin == 0.0
    }

    fn is_zero_edited_trigger_price(&self) -> bool {
        self.request.edited_trigger_price == 0
    }

    fn validate_edited_activation_state(&self) -> Result<(), OfferEditError> {
        if !self.is_zero_edited_fixed_price()
            || !self.is_zero_edited_market_price_margin()
            || !self.is_zero_edited_trigger_price()
        {
            return Err(OfferEditError::PriceChangeInActivationEdit {
                offer_id: self.offer.id.clone(),
                fixed_price: self.request.edited_fixed_price_text.clone(),
                market_price_margin: self.request.edited_market_price_margin,
                trigger_price: self.request.edited_trigger_price,
            });
        }
        Ok(())
    }

    fn validate_edited_fixed_price(&self) -> Result<(), OfferEditError> {
        if self.offer.use_market_based_price {
            tracing::info!(
                offer_id = %self.offer.id,
                "changing mkt price margin based offer to fixed price offer"
            );
        }

        if self.request.edited_use_market_based_price {
            return Err(OfferEditError::MarketPriceInFixedPriceEdit {
                offer_id: self.offer.id.clone(),
                fixed_price: self.request.edited_fixed_price_text.clone(),
            });
        }

        if !self.is_zero_edited_trigger_price() {
            return Err(OfferEditError::TriggerPriceInFixedPriceEdit {
                offer_id: self.offer.id.clone(),
                trigger_price: self.request.edited_trigger_price,
            });
        }
        Ok(())
    }

    fn validate_edited_market_price_margin(&self) -> Result<(), OfferEditError> {
        if !self.offer.use_market_based_price {
            tracing::info!(
                offer_id = %self.offer.id,
                "changing fixed price offer to mkt price margin based offer"
            );
        }

        if !self.request.edited_use_market_based_price && !self.is_zero_edited_trigger_price() {
            return Err(OfferEditError::TriggerPriceOnFixedPriceOffer {
                offer_id: self.offer.id.clone(),
                trigger_price: self.request.edited_trigger_price,
            });
        }

        if !self.is_zero_edited_fixed_price() {
            return Err(OfferEditError::FixedPriceInMarketPriceEdit {
                offer_id: self.offer.id.clone(),
                fixed_price: self.request.edited_fixed_price_text.clone(),
            });
        }
        Ok(())
    }

    fn validate_edited_trigger_price(&self) -> Result<(), OfferEditError> {
        if self.request.edited_trigger_price < 0 {
            return Err(OfferEditError::NegativeTriggerPrice {
                offer_id: self.offer.id.clone(),
                trigger_price: self.request.edited_trigger_price,
            });
        }
        Ok(())
    }
}

/// Validates `request` against `offer` without applying it.
pub fn validate_edit(offer: &OpenOffer, request: &EditOfferRequest) -> Result<(), OfferEditError> {
    EditOfferValidator::new(offer, request)?.validate()
}
