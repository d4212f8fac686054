//! Technical indicators
//!
//! Batch indicator calculations over f64 slices. All functions return one
//! value per input bar, with `None` during the warm-up window.

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate Exponential Moving Average, seeded with the SMA of the first window
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        let next = if i + 1 < period {
            None
        } else if i + 1 == period {
            Some(values[0..period].iter().sum::<f64>() / period as f64)
        } else {
            prev.map(|p| (value - p) * multiplier + p)
        };
        if next.is_some() {
            prev = next;
        }
        result.push(next);
    }

    result
}

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR)
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    ema(&tr, period)
}

/// Calculate Directional Movement Index (DMI) components
pub fn dmi(high: &[f64], low: &[f64], period: usize) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut plus_dm = vec![0.0; high.len()];
    let mut minus_dm = vec![0.0; high.len()];

    for i in 1..high.len() {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];

        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    (ema(&plus_dm, period), ema(&minus_dm, period))
}

/// Calculate Average Directional Index (ADX)
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let (plus_di, minus_di) = dmi(high, low, period);
    let atr_values = atr(high, low, close, period);

    let mut dx = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let dx_val = match (plus_di[i], minus_di[i], atr_values[i]) {
            (Some(pdi), Some(mdi), Some(atr_val)) if atr_val > 0.0 => {
                let pdi_norm = pdi / atr_val * 100.0;
                let mdi_norm = mdi / atr_val * 100.0;
                let sum = pdi_norm + mdi_norm;
                if sum > 0.0 {
                    ((pdi_norm - mdi_norm).abs() / sum) * 100.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        dx.push(dx_val);
    }

    ema(&dx, period)
}

/// Calculate Bollinger Bands: (upper, middle, lower)
pub fn bollinger_bands(
    values: &[f64],
    period: usize,
    num_std: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let middle = sma(values, period);
    let mut upper = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        match middle[i] {
            Some(mid) if i + 1 >= period => {
                let window = &values[i + 1 - period..=i];
                let variance: f64 = window
                    .iter()
                    .map(|&x| {
                        let diff = x - mid;
                        diff * diff
                    })
                    .sum::<f64>()
                    / period as f64;
                let std_dev = variance.sqrt();

                upper.push(Some(mid + num_std * std_dev));
                lower.push(Some(mid - num_std * std_dev));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    (upper, middle, lower)
}

/// Calculate RSI (Relative Strength Index)
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut gains = Vec::with_capacity(values.len());
    let mut losses = Vec::with_capacity(values.len());

    gains.push(0.0);
    losses.push(0.0);

    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    let avg_gains = ema(&gains, period);
    let avg_losses = ema(&losses, period);

    let mut rsi_values = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        let v = match (avg_gains[i], avg_losses[i]) {
            (Some(_), Some(avg_loss)) if avg_loss == 0.0 => Some(100.0),
            (Some(avg_gain), Some(avg_loss)) => {
                let rs = avg_gain / avg_loss;
                Some(100.0 - (100.0 / (1.0 + rs)))
            }
            _ => None,
        };
        rsi_values.push(v);
    }

    rsi_values
}

/// Calculate MACD line and its signal line
pub fn macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let ema_fast = ema(values, fast);
    let ema_slow = ema(values, slow);

    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal = EMA of the MACD line once it exists; warm-up bars stay None
    let warmup = macd_line.iter().take_while(|v| v.is_none()).count();
    let live: Vec<f64> = macd_line[warmup..].iter().filter_map(|&v| v).collect();
    let signal_tail = ema(&live, signal);

    let mut signal_line = vec![None; warmup];
    signal_line.extend(signal_tail);

    (macd_line, signal_line)
}

/// Rolling variance over the trailing window
pub fn rolling_variance(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let means = sma(values, period);
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        match means[i] {
            Some(mean) => {
                let window = &values[i + 1 - period..=i];
                let var = window.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>()
                    / period as f64;
                result.push(Some(var));
            }
            None => result.push(None),
        }
    }

    result
}

/// Standard deviation of simple returns over the trailing window
pub fn returns_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut returns = Vec::with_capacity(values.len());
    returns.push(0.0);
    for i in 1..values.len() {
        let r = if values[i - 1] != 0.0 {
            (values[i] - values[i - 1]) / values[i - 1]
        } else {
            0.0
        };
        returns.push(r);
    }

    rolling_variance(&returns, period)
        .into_iter()
        .map(|v| v.map(f64::sqrt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_ema_warmup() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0)); // seeded with SMA
        assert!(result[3].unwrap() > 2.0);
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let values: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let result = rsi(&values, 14);
        assert_relative_eq!(result.last().unwrap().unwrap(), 100.0);
    }

    #[test]
    fn test_macd_signal_warmup_aligns() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let (line, signal) = macd(&values, 12, 26, 9);
        assert_eq!(line.len(), values.len());
        assert_eq!(signal.len(), values.len());
        assert!(line[24].is_none());
        assert!(line[26].is_some());
        assert!(signal.last().unwrap().is_some());
    }

    #[test]
    fn test_bollinger_bands_bracket_sma() {
        let values: Vec<f64> = (0..30).map(|i| 50.0 + (i % 5) as f64).collect();
        let (upper, middle, lower) = bollinger_bands(&values, 20, 2.0);
        let i = values.len() - 1;
        assert!(upper[i].unwrap() > middle[i].unwrap());
        assert!(lower[i].unwrap() < middle[i].unwrap());
    }

    #[test]
    fn test_returns_std_flat_series_is_zero() {
        let values = vec![100.0; 30];
        let result = returns_std(&values, 10);
        assert_relative_eq!(result.last().unwrap().unwrap(), 0.0);
    }
}
