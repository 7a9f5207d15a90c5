//! Black–Scholes binary-option pricing.

/// Standard normal PDF: phi(x) = (1/sqrt(2*pi)) * exp(-x^2/2)
#[inline]
pub fn phi(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF via Abramowitz & Stegun 26.2.17.
/// Max error < 7.5e-8.
#[inline]
pub fn cdf(x: f64) -> f64 {
    if x >= 0.0 {
        const P: f64 = 0.231_641_9;
        const B1: f64 = 0.319_381_530;
        const B2: f64 = -0.356_563_782;
        const B3: f64 = 1.781_477_937;
        const B4: f64 = -1.821_255_978;
        const B5: f64 = 1.330_274_429;

        let t = 1.0 / (1.0 + P * x);
        let t2 = t * t;
        let t3 = t2 * t;
        let t4 = t3 * t;
        let t5 = t4 * t;
        1.0 - phi(x) * (B1 * t + B2 * t2 + B3 * t3 + B4 * t4 + B5 * t5)
    } else {
        1.0 - cdf(-x)
    }
}

/// Fair value of a cash-or-nothing binary call:
/// `e^(-r t) * Phi(d2)` with `d2 = (ln(S/K) + (r - sigma^2/2) t) / (sigma sqrt(t))`.
///
/// `t` is in years. Undefined for `t <= 0` or `sigma <= 0`; callers guard.
#[inline]
pub fn binary_call_price(spot: f64, strike: f64, t: f64, sigma: f64, r: f64) -> f64 {
    debug_assert!(t > 0.0 && sigma > 0.0, "caller must guard t and sigma");
    let d2 = ((spot / strike).ln() + (r - 0.5 * sigma * sigma) * t) / (sigma * t.sqrt());
    (-r * t).exp() * cdf(d2)
}
