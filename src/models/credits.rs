use serde::{Deserialize, Serialize};

/// Plan tiers of the consumer app. The tier only matters for the discount
/// applied to credit-pack list prices.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Base,
    Pro,
    Plus,
    Astro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Base => "base",
            PlanTier::Pro => "pro",
            PlanTier::Plus => "plus",
            PlanTier::Astro => "astro",
        }
    }

    /// Lenient parse used for query parameters: unknown or missing tiers fall
    /// back to `base` (no discount), matching how the storefront treats
    /// anonymous users.
    pub fn from_option(value: Option<&str>) -> Self {
        match value {
            Some("pro") => PlanTier::Pro,
            Some("plus") => PlanTier::Plus,
            Some("astro") => PlanTier::Astro,
            _ => PlanTier::Base,
        }
    }

    pub fn discount_percent(&self) -> u32 {
        match self {
            PlanTier::Base => 0,
            PlanTier::Pro => 5,
            PlanTier::Plus => 10,
            PlanTier::Astro => 20,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CreditPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: u32,
    /// List price in cents before any plan discount.
    pub base_price_cents: u32,
    pub description: &'static str,
}

pub const CREDIT_PACKAGES: [CreditPackage; 3] = [
    CreditPackage {
        id: "500",
        name: "500 Credits",
        credits: 500,
        base_price_cents: 999,
        description: "Perfect for casual users",
    },
    CreditPackage {
        id: "2000",
        name: "2000 Credits",
        credits: 2000,
        base_price_cents: 1999,
        description: "Great for regular users",
    },
    CreditPackage {
        id: "3500",
        name: "3500 Credits",
        credits: 3500,
        base_price_cents: 3999,
        description: "Best value for power users",
    },
];

/// Looks up a package by id. Unknown ids are an error for callers, never a
/// zero-credit default.
pub fn find_package(package_id: &str) -> Option<&'static CreditPackage> {
    CREDIT_PACKAGES.iter().find(|p| p.id == package_id)
}

pub fn discounted_price_cents(package: &CreditPackage, tier: PlanTier) -> u32 {
    let discount = tier.discount_percent();
    package.base_price_cents * (100 - discount) / 100
}

pub fn savings_cents(package: &CreditPackage, tier: PlanTier) -> u32 {
    package.base_price_cents - discounted_price_cents(package, tier)
}
