//! Deterministic cost-for-two basket pricing.
//!
//! Pure business logic: no OCR, no LLM, no database. Given the same item
//! list and tax rate, the output is always identical.

use std::collections::BTreeMap;

use crate::{
    model::{CostCalculation, CostForTwo, ItemCategory, ParsedItem, SelectedItem},
    prelude::*,
};

/// Confidence recorded on every computed basket.
const BASKET_CONFIDENCE: f64 = 0.93;

/// How many items of each category make up the standard basket.
///
/// These are fixed constants of the pricing signal, not derived from the
/// menu: a meal for two is one starter, one main, two drinks, one dessert.
#[derive(Clone, Copy, Debug)]
pub struct BasketSpec {
    pub starters: usize,
    pub main_courses: usize,
    pub drinks: usize,
    pub desserts: usize,
}

/// The standard cost-for-two basket.
pub const DEFAULT_BASKET: BasketSpec = BasketSpec {
    starters: 1,
    main_courses: 1,
    drinks: 2,
    desserts: 1,
};

impl BasketSpec {
    /// Basket capacity for a category.
    fn capacity(&self, category: ItemCategory) -> usize {
        match category {
            ItemCategory::Starter => self.starters,
            ItemCategory::MainCourse => self.main_courses,
            ItemCategory::Drink => self.drinks,
            ItemCategory::Dessert => self.desserts,
        }
    }

    /// All categories this basket draws from.
    fn categories(&self) -> [ItemCategory; 4] {
        [
            ItemCategory::Starter,
            ItemCategory::MainCourse,
            ItemCategory::Drink,
            ItemCategory::Dessert,
        ]
    }
}

/// Build the cost-for-two basket for a parsed menu.
///
/// Items are considered in their given order; each is selected if its
/// category still has basket capacity, and skipped otherwise. A partially
/// filled basket (say, a menu with no desserts) still produces a comparable
/// total, since partial data is more useful than no data. An empty item list
/// or a basket that could not be filled at all is an error.
pub fn cost_for_two(
    items: &[ParsedItem],
    tax_percent: f64,
    basket: &BasketSpec,
) -> Result<CostForTwo> {
    if items.is_empty() {
        return Err(anyhow!("empty parsed menu"));
    }

    let mut selected: BTreeMap<ItemCategory, Vec<SelectedItem>> = BTreeMap::new();
    let mut counts: BTreeMap<ItemCategory, usize> = BTreeMap::new();
    let mut subtotal = 0.0;

    for item in items {
        let capacity = basket.capacity(item.category);
        let count = counts.entry(item.category).or_insert(0);
        if *count >= capacity {
            continue;
        }
        selected.entry(item.category).or_default().push(SelectedItem {
            name: item.name.clone(),
            price: item.price,
        });
        *count += 1;
        subtotal += item.price;
    }

    if subtotal == 0.0 {
        return Err(anyhow!("insufficient data to calculate cost for two"));
    }

    let availability = basket
        .categories()
        .into_iter()
        .map(|category| {
            let filled = counts.get(&category).copied().unwrap_or(0);
            (category, filled >= basket.capacity(category))
        })
        .collect();

    let tax = subtotal * tax_percent / 100.0;
    Ok(CostForTwo {
        selected_items: selected,
        availability,
        calculation: CostCalculation {
            subtotal,
            tax,
            total_cost_for_two: subtotal + tax,
        },
        confidence: BASKET_CONFIDENCE,
    })
}
