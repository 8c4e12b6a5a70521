//! Dense kind indices for closed event variant sets.
//!
//! Every event category (system, user, self-match) has a companion `*Kind`
//! enum. [`KindIndex`] maps each kind onto `[0, cardinality)` so dispatch
//! tables can be plain `Vec`s indexed by kind instead of hash maps.
//!
//! Kind enums are declared with [`kind_enum!`], which generates the enum,
//! `ALL` and `index()` from a single variant list. A variant cannot be added
//! to one without the others.

/// A closed variant set with a total, dense index.
pub trait KindIndex: Copy + Eq + std::fmt::Debug + 'static {
    /// Every variant, ordered by index.
    const ALL: &'static [Self];

    /// Index of this variant in `[0, cardinality())`.
    fn index(self) -> usize;

    /// Number of variants in the set.
    fn cardinality() -> usize {
        Self::ALL.len()
    }

    /// Largest index produced by [`KindIndex::index`].
    fn max_index() -> usize {
        Self::cardinality() - 1
    }
}

/// Declares a fieldless enum together with its [`KindIndex`] impl.
///
/// `ALL` lists the variants in declaration order and `index()` is the
/// discriminant, so the mapping is dense by construction. Explicit
/// discriminants are not accepted.
///
/// ```
/// usiagent_core::kind_enum! {
///     pub enum Light { Red, Amber, Green }
/// }
///
/// use usiagent_core::KindIndex;
/// assert_eq!(Light::cardinality(), 3);
/// assert_eq!(Light::Green.index(), 2);
/// assert_eq!(Light::ALL[1], Light::Amber);
/// ```
#[macro_export]
macro_rules! kind_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::kind::KindIndex for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

/// Maps an event value onto its kind.
pub trait MapEventKind<K: KindIndex> {
    fn event_kind(&self) -> K;
}

/// Returns `true` when `index` is a bijection from `K::ALL` onto `[0, N)`.
pub fn is_dense<K: KindIndex>() -> bool {
    let n = K::cardinality();
    let mut seen = vec![false; n];
    for (position, kind) in K::ALL.iter().enumerate() {
        let i = kind.index();
        if i >= n || i != position || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    seen.into_iter().all(|s| s)
}
