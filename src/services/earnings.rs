//! Merchant categorization and per-category earnings rates.

use crate::models::receipt::ReceiptCategory;

const ELECTRONICS: &[&str] = &[
    "apple",
    "best buy",
    "microcenter",
    "newegg",
    "electronics",
];

const GROCERY: &[&str] = &[
    "walmart",
    "costco",
    "kroger",
    "safeway",
    "whole foods",
    "trader joe",
    "grocery",
    "market",
];

const RESTAURANT: &[&str] = &[
    "restaurant",
    "cafe",
    "pizza",
    "burger",
    "grill",
    "kitchen",
    "mcdonald",
    "starbucks",
    "dunkin",
    "chipotle",
    "subway",
];

const PHARMACY: &[&str] = &["cvs", "walgreens", "rite aid", "pharmacy"];

const RETAIL: &[&str] = &[
    "target",
    "amazon",
    "home depot",
    "macy",
    "nordstrom",
    "gap",
    "old navy",
    "tj maxx",
    "ross",
    "store",
];

/// Assign a category from the merchant name. First matching group wins.
pub fn categorize(merchant: &str) -> ReceiptCategory {
    let merchant = merchant.to_lowercase();
    let groups = [
        (ELECTRONICS, ReceiptCategory::Electronics),
        (GROCERY, ReceiptCategory::Grocery),
        (RESTAURANT, ReceiptCategory::Restaurant),
        (PHARMACY, ReceiptCategory::Pharmacy),
        (RETAIL, ReceiptCategory::Retail),
    ];

    groups
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| merchant.contains(n)))
        .map(|(_, category)| *category)
        .unwrap_or(ReceiptCategory::Other)
}

/// Share of the receipt total paid out for a category.
pub fn rate(category: ReceiptCategory) -> f64 {
    match category {
        ReceiptCategory::Grocery => 0.0008,
        ReceiptCategory::Electronics => 0.020,
        ReceiptCategory::Restaurant => 0.0003,
        ReceiptCategory::Retail => 0.0012,
        ReceiptCategory::Pharmacy => 0.0015,
        ReceiptCategory::Other => 0.0005,
    }
}

/// Earnings for a receipt total, rounded to cents. Negative totals earn nothing.
pub fn calculate_earnings(total: f64, category: ReceiptCategory) -> f64 {
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    (total * rate(category) * 100.0).round() / 100.0
}
