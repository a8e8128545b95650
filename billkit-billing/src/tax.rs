//! Tax records and the jurisdiction-based rate resolver
//!
//! The resolver combines a static jurisdiction/product-type rule table with
//! the taxes already configured for a country, ranks the suggestions by
//! confidence, and deduplicates identical rates. Rate validation only ever
//! produces warnings; it never blocks creating a tax.

use crate::Amount;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// A configured tax rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tax {
    pub id: Uuid,
    pub name: String,
    /// Percentage rate (e.g. `dec!(18)` for 18%).
    pub rate: Decimal,
    pub tax_type: String,
    pub country: String,
    pub state: Option<String>,
    pub is_active: bool,
}

impl Tax {
    pub fn new(name: impl Into<String>, rate: Decimal, country: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rate,
            tax_type: "percentage".to_string(),
            country: country.into(),
            state: None,
            is_active: true,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Tax owed on a subtotal at this rate, rounded to the cent.
    pub fn amount_on(&self, subtotal: Amount) -> Amount {
        subtotal.percentage(self.rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Service,
    Digital,
    Physical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionSource {
    /// From the static jurisdiction rule table.
    RuleTable,
    /// Reused from a previously configured tax for the country.
    Historical,
}

/// A ranked tax suggestion for a jurisdiction/product combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxSuggestion {
    pub name: String,
    pub rate: Decimal,
    pub confidence: f32,
    pub source: SuggestionSource,
}

/// A non-blocking validation warning on a tax rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxWarning {
    /// Rate is outside the accepted [0, 50]% range.
    OutOfRange,
    /// Rate above 30% is unusual for any jurisdiction.
    Anomalous,
    /// Rate is not one of the standard slabs for this country.
    NonStandard { country: String },
}

const RULE_CONFIDENCE: f32 = 0.9;
const HISTORICAL_CONFIDENCE: f32 = 0.7;

/// India GST slabs; anything else is flagged non-standard.
const INDIA_STANDARD_RATES: [Decimal; 4] = [dec!(5), dec!(12), dec!(18), dec!(28)];
/// UK VAT bands.
const UK_STANDARD_RATES: [Decimal; 3] = [dec!(0), dec!(5), dec!(20)];

pub struct TaxResolver;

impl TaxResolver {
    /// Ranked tax suggestions for a jurisdiction and product type.
    ///
    /// Static rules rank at 0.9 confidence, historical reuse of configured
    /// active taxes at 0.7. Suggestions with a rate already present are
    /// dropped, so the list never repeats a rate.
    pub fn suggest(
        country: &str,
        _state: Option<&str>,
        product_type: ProductType,
        configured: &[Tax],
    ) -> Vec<TaxSuggestion> {
        let mut suggestions = Self::rule_table(country, product_type);

        for tax in configured {
            if !tax.is_active || !tax.country.eq_ignore_ascii_case(country) {
                continue;
            }
            suggestions.push(TaxSuggestion {
                name: tax.name.clone(),
                rate: tax.rate,
                confidence: HISTORICAL_CONFIDENCE,
                source: SuggestionSource::Historical,
            });
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.rate.cmp(&a.rate))
        });

        let mut seen_rates: Vec<Decimal> = Vec::new();
        suggestions.retain(|s| {
            if seen_rates.contains(&s.rate) {
                false
            } else {
                seen_rates.push(s.rate);
                true
            }
        });

        suggestions
    }

    fn rule_table(country: &str, product_type: ProductType) -> Vec<TaxSuggestion> {
        let rule = |name: &str, rate: Decimal| TaxSuggestion {
            name: name.to_string(),
            rate,
            confidence: RULE_CONFIDENCE,
            source: SuggestionSource::RuleTable,
        };

        match country.to_ascii_uppercase().as_str() {
            "INDIA" | "IN" => match product_type {
                ProductType::Service | ProductType::Digital => vec![rule("GST 18%", dec!(18))],
                ProductType::Physical => vec![rule("CGST + SGST 18%", dec!(18))],
            },
            "USA" | "US" | "UNITED STATES" => match product_type {
                ProductType::Digital => vec![
                    rule("Sales Tax 7%", dec!(7)),
                    rule("Digital Services Tax 5%", dec!(5)),
                ],
                _ => vec![rule("Sales Tax 7%", dec!(7))],
            },
            "UK" | "GB" | "UNITED KINGDOM" => vec![rule("VAT 20%", dec!(20))],
            _ => Vec::new(),
        }
    }

    /// Validate a rate for a country. Warnings only, never an error.
    pub fn validate_rate(country: &str, rate: Decimal) -> Vec<TaxWarning> {
        let mut warnings = Vec::new();

        if rate < Decimal::ZERO || rate > dec!(50) {
            warnings.push(TaxWarning::OutOfRange);
        }
        if rate > dec!(30) {
            warnings.push(TaxWarning::Anomalous);
        }

        let standard: Option<&[Decimal]> = match country.to_ascii_uppercase().as_str() {
            "INDIA" | "IN" => Some(&INDIA_STANDARD_RATES),
            "UK" | "GB" | "UNITED KINGDOM" => Some(&UK_STANDARD_RATES),
            _ => None,
        };
        if let Some(standard) = standard {
            if !standard.contains(&rate) {
                warnings.push(TaxWarning::NonStandard {
                    country: country.to_string(),
                });
            }
        }

        warnings
    }
}
