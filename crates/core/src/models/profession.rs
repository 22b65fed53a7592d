//! Built-in profession templates used to seed players.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{player::Liability, Cash};

/// Starting financial statement for a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profession {
    /// Display name, matched case-insensitively.
    pub name: String,
    /// Monthly salary.
    pub salary: Cash,
    /// Starting cash.
    pub savings: Cash,
    /// Named recurring expenses that are not loan payments.
    pub expenses: BTreeMap<String, Cash>,
    /// Starting debts and their payments.
    pub liabilities: Vec<Liability>,
    /// Expense added per child.
    pub per_baby_expense: Cash,
}

struct Template {
    name: &'static str,
    salary: Cash,
    savings: Cash,
    taxes: Cash,
    other: Cash,
    per_baby_expense: Cash,
    liabilities: &'static [(&'static str, Cash, Cash)],
}

const TEMPLATES: &[Template] = &[
    Template {
        name: "Teacher",
        salary: 3_300,
        savings: 400,
        taxes: 630,
        other: 760,
        per_baby_expense: 180,
        liabilities: &[
            ("Home Mortgage", 50_000, 500),
            ("School Loans", 12_000, 60),
            ("Car Loans", 5_000, 100),
            ("Credit Cards", 3_000, 90),
        ],
    },
    Template {
        name: "Engineer",
        salary: 4_900,
        savings: 400,
        taxes: 1_050,
        other: 1_090,
        per_baby_expense: 250,
        liabilities: &[
            ("Home Mortgage", 75_000, 700),
            ("School Loans", 12_000, 60),
            ("Car Loans", 7_000, 140),
            ("Credit Cards", 4_000, 120),
        ],
    },
    Template {
        name: "Janitor",
        salary: 1_600,
        savings: 560,
        taxes: 280,
        other: 300,
        per_baby_expense: 70,
        liabilities: &[
            ("Home Mortgage", 20_000, 200),
            ("Car Loans", 4_000, 60),
            ("Credit Cards", 2_000, 60),
        ],
    },
    Template {
        name: "Nurse",
        salary: 3_100,
        savings: 480,
        taxes: 600,
        other: 710,
        per_baby_expense: 170,
        liabilities: &[
            ("Home Mortgage", 47_000, 400),
            ("School Loans", 6_000, 30),
            ("Car Loans", 5_000, 100),
            ("Credit Cards", 3_000, 90),
        ],
    },
    Template {
        name: "Doctor",
        salary: 13_200,
        savings: 400,
        taxes: 3_420,
        other: 2_880,
        per_baby_expense: 640,
        liabilities: &[
            ("Home Mortgage", 202_000, 1_900),
            ("School Loans", 150_000, 750),
            ("Car Loans", 19_000, 380),
            ("Credit Cards", 10_000, 270),
        ],
    },
];

static PROFESSIONS: Lazy<Vec<Profession>> = Lazy::new(|| {
    TEMPLATES
        .iter()
        .map(|template| Profession {
            name: template.name.to_string(),
            salary: template.salary,
            savings: template.savings,
            expenses: BTreeMap::from([
                ("Taxes".to_string(), template.taxes),
                ("Other Expenses".to_string(), template.other),
            ]),
            liabilities: template
                .liabilities
                .iter()
                .map(|(name, balance, payment)| Liability {
                    name: name.to_string(),
                    balance: *balance,
                    payment: *payment,
                })
                .collect(),
            per_baby_expense: template.per_baby_expense,
        })
        .collect()
});

/// All known professions.
pub fn all() -> &'static [Profession] {
    &PROFESSIONS
}

/// Look up a profession by name, ignoring case.
pub fn find(name: &str) -> Option<&'static Profession> {
    let needle = name.trim();
    PROFESSIONS
        .iter()
        .find(|profession| profession.name.eq_ignore_ascii_case(needle))
}
