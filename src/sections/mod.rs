//! Tab and section selection.
//!
//! A selector holds exactly one active section out of a fixed set. Switching
//! is purely local state; nothing here performs I/O.

use serde::Serialize;
use std::fmt::Debug;

pub trait Section: Copy + Eq + Debug + 'static {
    /// Every section, in display order. The first one is the default.
    const ALL: &'static [Self];

    fn slug(&self) -> &'static str;

    fn title(&self) -> &'static str;

    fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.slug() == slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSelector<S: Section> {
    active: S,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionView {
    pub slug: &'static str,
    pub title: &'static str,
    pub active: bool,
}

impl<S: Section> Default for SectionSelector<S> {
    fn default() -> Self {
        Self { active: S::ALL[0] }
    }
}

impl<S: Section> SectionSelector<S> {
    pub fn new(active: S) -> Self {
        Self { active }
    }

    pub fn active(&self) -> S {
        self.active
    }

    pub fn select(&mut self, section: S) {
        self.active = section;
    }

    /// Select by slug; unknown slugs leave the selection untouched
    pub fn select_slug(&mut self, slug: &str) -> Option<S> {
        let section = S::from_slug(slug)?;
        self.active = section;
        Some(section)
    }

    pub fn views(&self) -> Vec<SectionView> {
        S::ALL
            .iter()
            .map(|s| SectionView {
                slug: s.slug(),
                title: s.title(),
                active: *s == self.active,
            })
            .collect()
    }
}

macro_rules! sections {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => ($slug:literal, $title:literal)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl Section for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn slug(&self) -> &'static str {
                match self {
                    $($name::$variant => $slug),+
                }
            }

            fn title(&self) -> &'static str {
                match self {
                    $($name::$variant => $title),+
                }
            }
        }
    };
}

sections!(
    /// Dashboard sidebar; each entry is a sub-path of the protected prefix
    SidebarSection {
        Overview => ("overview", "Overview"),
        Brand => ("brand", "Brand"),
        Tiers => ("tiers", "Tiers"),
        Updates => ("updates", "Updates"),
        Expenses => ("expenses", "Expenses"),
        Payouts => ("payouts", "Payouts"),
        Settings => ("settings", "Settings"),
    }
);

sections!(
    ProfileSection {
        About => ("about", "About"),
        Contributions => ("contributions", "Contributions"),
        Settings => ("settings", "Settings"),
    }
);

sections!(
    /// Public brand page tabs
    BrandSection {
        Overview => ("overview", "Overview"),
        Tiers => ("tiers", "Tiers"),
        Updates => ("updates", "Updates"),
        Supporters => ("supporters", "Supporters"),
    }
);
