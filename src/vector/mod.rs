//! MBTI vector algebra: normalization, type labeling, cosine similarity, blending.
//!
//! Every `MBTIVector` is eight probabilities indexed by the traits
//! `{E, I, S, N, T, F, J, P}`. The four opposing pairs `(E,I)`, `(S,N)`,
//! `(T,F)`, `(J,P)` are expected to each sum to 1.0; `Normalize` restores
//! that invariant after any blend or LLM response.

use serde::{Deserialize, Serialize};

pub const PAIRS: [(Trait, Trait); 4] = [
    (Trait::E, Trait::I),
    (Trait::S, Trait::N),
    (Trait::T, Trait::F),
    (Trait::J, Trait::P),
];

/// Tolerance used when asserting the pair-sum-to-one invariant in tests.
pub const PAIR_SUM_TOLERANCE: f64 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trait {
    E,
    I,
    S,
    N,
    T,
    F,
    J,
    P,
}

impl Trait {
    pub fn as_char(&self) -> char {
        match self {
            Trait::E => 'E',
            Trait::I => 'I',
            Trait::S => 'S',
            Trait::N => 'N',
            Trait::T => 'T',
            Trait::F => 'F',
            Trait::J => 'J',
            Trait::P => 'P',
        }
    }
}

/// An 8-dimensional MBTI probability vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MBTIVector {
    pub e: f64,
    pub i: f64,
    pub s: f64,
    pub n: f64,
    pub t: f64,
    pub f: f64,
    pub j: f64,
    pub p: f64,
}

impl MBTIVector {
    pub const NEUTRAL: MBTIVector = MBTIVector {
        e: 0.5,
        i: 0.5,
        s: 0.5,
        n: 0.5,
        t: 0.5,
        f: 0.5,
        j: 0.5,
        p: 0.5,
    };

    pub fn new(e: f64, i: f64, s: f64, n: f64, t: f64, f: f64, j: f64, p: f64) -> Self {
        Self { e, i, s, n, t, f, j, p }
    }

    /// The 8 components in the fixed `EISNTFJP` order.
    pub fn components(&self) -> [f64; 8] {
        [self.e, self.i, self.s, self.n, self.t, self.f, self.j, self.p]
    }

    pub fn from_components(c: [f64; 8]) -> Self {
        Self {
            e: c[0],
            i: c[1],
            s: c[2],
            n: c[3],
            t: c[4],
            f: c[5],
            j: c[6],
            p: c[7],
        }
    }

    fn pair_values(&self, pair: (Trait, Trait)) -> (f64, f64) {
        (self.value_of(pair.0), self.value_of(pair.1))
    }

    pub fn value_of(&self, t: Trait) -> f64 {
        match t {
            Trait::E => self.e,
            Trait::I => self.i,
            Trait::S => self.s,
            Trait::N => self.n,
            Trait::T => self.t,
            Trait::F => self.f,
            Trait::J => self.j,
            Trait::P => self.p,
        }
    }

    fn set_value(&mut self, t: Trait, v: f64) {
        match t {
            Trait::E => self.e = v,
            Trait::I => self.i = v,
            Trait::S => self.s = v,
            Trait::N => self.n = v,
            Trait::T => self.t = v,
            Trait::F => self.f = v,
            Trait::J => self.j = v,
            Trait::P => self.p = v,
        }
    }

    /// Scales each opposing pair to sum to 1.0; pairs summing to 0 become neutral.
    /// Idempotent: `normalize(normalize(v)) == normalize(v)`.
    pub fn normalize(&self) -> MBTIVector {
        let mut out = *self;
        for pair in PAIRS {
            let (a, b) = self.pair_values(pair);
            let total = a + b;
            if total > 0.0 {
                out.set_value(pair.0, a / total);
                out.set_value(pair.1, b / total);
            } else {
                out.set_value(pair.0, 0.5);
                out.set_value(pair.1, 0.5);
            }
        }
        out
    }

    /// The 4-letter type label, dominant trait per pair. Ties favor the
    /// first-listed trait of the pair (E, S, T, J).
    pub fn type_label(&self) -> String {
        PAIRS
            .iter()
            .map(|pair| {
                let (a, b) = self.pair_values(*pair);
                if a >= b {
                    pair.0.as_char()
                } else {
                    pair.1.as_char()
                }
            })
            .collect()
    }

    /// The 4-axis projection used for serve-time similarity: the
    /// probability of the dominant side of each pair, in `E,S,T,J` order.
    pub fn reduced_axes(&self) -> [f64; 4] {
        let mut axes = [0.0; 4];
        for (slot, pair) in axes.iter_mut().zip(PAIRS) {
            let (a, b) = self.pair_values(pair);
            *slot = a.max(b);
        }
        axes
    }

    /// Per-pair confidence: the absolute difference within each pair.
    pub fn confidence(&self) -> Confidence {
        Confidence {
            ei: (self.e - self.i).abs(),
            sn: (self.s - self.n).abs(),
            tf: (self.t - self.f).abs(),
            jp: (self.j - self.p).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub ei: f64,
    pub sn: f64,
    pub tf: f64,
    pub jp: f64,
}

/// Cosine similarity over an arbitrary-length vector pair. Zero-norm
/// inputs (either side) yield 0.0 rather than NaN.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Cosine similarity between two full 8-dimensional MBTI vectors.
pub fn cosine_8d(a: &MBTIVector, b: &MBTIVector) -> f64 {
    cosine(&a.components(), &b.components())
}

/// Weighted average of the given vectors followed by normalization.
/// Negative weights are not expected; weights that are all zero (or the
/// input is empty) yield the neutral vector.
pub fn blend(vectors: &[MBTIVector], weights: &[f64]) -> MBTIVector {
    debug_assert_eq!(vectors.len(), weights.len());
    if vectors.is_empty() {
        return MBTIVector::NEUTRAL;
    }
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return MBTIVector::NEUTRAL;
    }
    let mut acc = [0.0f64; 8];
    for (v, w) in vectors.iter().zip(weights) {
        for (slot, component) in acc.iter_mut().zip(v.components()) {
            *slot += component * w;
        }
    }
    for slot in acc.iter_mut() {
        *slot /= total_weight;
    }
    MBTIVector::from_components(acc).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_idempotent() {
        let v = MBTIVector::new(0.7, 0.1, 0.3, 0.9, 0.6, 0.6, 0.2, 0.9);
        let once = v.normalize();
        let twice = once.normalize();
        assert_eq!(once.components(), twice.components());
    }

    #[test]
    fn normalize_zero_sum_pair_goes_neutral() {
        let v = MBTIVector::new(0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5);
        let n = v.normalize();
        assert_eq!(n.e, 0.5);
        assert_eq!(n.i, 0.5);
    }

    #[test]
    fn type_label_ties_favor_first() {
        let v = MBTIVector::new(0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5);
        assert_eq!(v.type_label(), "ESTJ");
    }

    #[test]
    fn type_label_estj() {
        let v = MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4);
        assert_eq!(v.type_label(), "ESTJ");
    }

    #[test]
    fn cosine_self_is_one() {
        let v = MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4);
        let c = cosine_8d(&v, &v);
        assert!((c - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let zero = MBTIVector::from_components([0.0; 8]);
        let v = MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4);
        assert_eq!(cosine_8d(&zero, &v), 0.0);
    }

    #[test]
    fn blend_empty_is_neutral() {
        let v = blend(&[], &[]);
        assert_eq!(v.components(), MBTIVector::NEUTRAL.components());
    }

    #[test]
    fn blend_all_zero_weights_is_neutral() {
        let vectors = [MBTIVector::new(0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4)];
        let v = blend(&vectors, &[0.0]);
        assert_eq!(v.components(), MBTIVector::NEUTRAL.components());
    }

    #[test]
    fn blend_commutative_under_permutation() {
        let a = MBTIVector::new(0.9, 0.1, 0.2, 0.8, 0.6, 0.4, 0.3, 0.7);
        let b = MBTIVector::new(0.2, 0.8, 0.9, 0.1, 0.4, 0.6, 0.8, 0.2);
        let c = MBTIVector::new(0.5, 0.5, 0.3, 0.7, 0.9, 0.1, 0.4, 0.6);

        let order1 = blend(&[a, b, c], &[1.0, 1.0, 1.0]);
        let order2 = blend(&[c, a, b], &[1.0, 1.0, 1.0]);
        let order3 = blend(&[b, c, a], &[1.0, 1.0, 1.0]);

        for (x, y) in order1.components().iter().zip(order2.components()) {
            assert!((x - y).abs() < 1e-9);
        }
        for (x, y) in order1.components().iter().zip(order3.components()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn confidence_is_absolute_difference() {
        let v = MBTIVector::new(0.9, 0.1, 0.5, 0.5, 0.6, 0.4, 0.3, 0.7);
        let c = v.confidence();
        assert!((c.ei - 0.8).abs() < 1e-9);
        assert!((c.sn - 0.0).abs() < 1e-9);
        assert!((c.tf - 0.2).abs() < 1e-9);
        assert!((c.jp - 0.4).abs() < 1e-9);
    }

    #[test]
    fn reduced_axes_picks_dominant_side() {
        let v = MBTIVector::new(0.9, 0.1, 0.2, 0.8, 0.6, 0.4, 0.3, 0.7);
        let axes = v.reduced_axes();
        assert!((axes[0] - 0.9).abs() < 1e-9); // E dominant
        assert!((axes[1] - 0.8).abs() < 1e-9); // N dominant
        assert!((axes[2] - 0.6).abs() < 1e-9); // T dominant
        assert!((axes[3] - 0.7).abs() < 1e-9); // P dominant
    }
}
