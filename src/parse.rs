//! Validating language-model output against the extraction contract.
//!
//! The model promised us a single JSON object in a fixed schema. Anything
//! else (prose, markdown fences, unknown categories, non-positive prices)
//! is rejected with a reason that ends up in `failure_reason`.

use std::sync::LazyLock;

use schemars::schema_for;

use crate::{
    cost::{DEFAULT_BASKET, cost_for_two},
    model::{PARSED_DOCUMENT_VERSION, ParsedDocument, ParsedMenu},
    prelude::*,
};

/// Validator for the response schema, derived from [`ParsedMenu`] itself so
/// the contract and the types can never drift apart.
static RESPONSE_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema = serde_json::to_value(schema_for!(ParsedMenu))
        .expect("response schema should serialize");
    jsonschema::validator_for(&schema).expect("response schema should be valid")
});

/// Validate a raw LLM response into a [`ParsedMenu`].
///
/// The canonical empty response (`{"items": [], "tax_percent": 0}`) is a
/// valid success: sparse and low-content documents are common.
#[instrument(level = "debug", skip_all)]
pub fn validate_response(raw: &str) -> Result<ParsedMenu> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| anyhow!("LLM returned invalid JSON: {}", err))?;

    if let Err(err) = RESPONSE_VALIDATOR.validate(&value) {
        return Err(anyhow!("LLM response violates the schema: {}", err));
    }

    let menu: ParsedMenu = serde_json::from_value(value)
        .map_err(|err| anyhow!("LLM response does not match the contract: {}", err))?;

    for (idx, item) in menu.items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(anyhow!("item {} is missing a name", idx + 1));
        }
        if !(item.price > 0.0) || !item.price.is_finite() {
            return Err(anyhow!(
                "item {:?} has a non-positive price {}",
                item.name,
                item.price
            ));
        }
    }
    if !(menu.tax_percent >= 0.0) || !menu.tax_percent.is_finite() {
        return Err(anyhow!("tax_percent {} is not valid", menu.tax_percent));
    }

    Ok(menu)
}

/// Build the canonical parsed document for a validated menu.
///
/// Fails when the cost-for-two basket cannot be derived; for this pipeline
/// that makes the whole parse a failure, since the pricing signal is the
/// entire point of parsing.
pub fn build_parsed_document(menu: ParsedMenu) -> Result<ParsedDocument> {
    let cost = cost_for_two(&menu.items, menu.tax_percent, &DEFAULT_BASKET)?;
    Ok(ParsedDocument {
        items: menu.items,
        tax_percent: menu.tax_percent,
        cost_for_two: cost,
        version: PARSED_DOCUMENT_VERSION.to_owned(),
    })
}
