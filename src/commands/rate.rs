use crate::args::RateArgs;
use crate::commands::Out;
use crate::model::Amount;
use crate::rates::{parse_date_text, HttpRateProvider, RateProvider};
use crate::{Config, Result};
use anyhow::{bail, Context};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The rate a run would use for one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLookup {
    pub date: NaiveDate,
    /// `None` when neither the date nor the days before it have a rate.
    pub rate: Option<Amount>,
}

/// Fetches the historical series and resolves `args.date()` the same way the conversion pass
/// does. When the date is `today` and the series has not caught up, today's official rate is used.
pub async fn rate(config: &Config, args: &RateArgs, today: NaiveDate) -> Result<Out<RateLookup>> {
    let Some(date) = parse_date_text(args.date()) else {
        bail!("'{}' is not a date, expected e.g. 2024-03-10 or 10/03/2024", args.date());
    };
    let key = args
        .rate_key()
        .or_else(|| config.rate_access_key())
        .map(str::to_string);
    let provider = HttpRateProvider::new(
        config.historical_rates_url(),
        config.current_rate_url(),
        config.rate_key_header(),
        key,
        config.request_timeout(),
    )?;
    let lookup = lookup(&provider, date, today).await?;
    let message = match lookup.rate {
        Some(rate) => format!("{}: {rate}", date.format("%d/%m/%Y")),
        None => format!("{}: unresolved", date.format("%d/%m/%Y")),
    };
    Ok(Out::new(message, lookup))
}

async fn lookup(rates: &dyn RateProvider, date: NaiveDate, today: NaiveDate) -> Result<RateLookup> {
    let mut table = rates
        .historical()
        .await
        .context("Unable to fetch the historical rates")?;
    if date == today && table.get(today).is_none() {
        match rates.current().await {
            Ok(current) if current > Decimal::ZERO => {
                table.insert(today, current);
            }
            Ok(_) => {}
            Err(e) => warn!("No current rate: {e:#}"),
        }
    }
    let resolved = table.resolve(date);
    Ok(RateLookup {
        date,
        rate: (resolved > Decimal::ZERO).then(|| Amount::new(resolved)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{march, FixedRates};
    use std::str::FromStr;

    fn amount(s: &str) -> Option<Amount> {
        Some(Amount::new(Decimal::from_str(s).unwrap()))
    }

    #[tokio::test]
    async fn test_lookup_falls_back() {
        let rates = FixedRates::new(&[(march(1), "36.5")], None);
        let found = lookup(&rates, march(4), march(20)).await.unwrap();
        assert_eq!(found.rate, amount("36.5"));
    }

    #[tokio::test]
    async fn test_lookup_unresolved() {
        let rates = FixedRates::new(&[(march(1), "36.5")], None);
        let found = lookup(&rates, march(15), march(20)).await.unwrap();
        assert_eq!(found.date, march(15));
        assert!(found.rate.is_none());
    }

    #[tokio::test]
    async fn test_lookup_today_uses_current() {
        let rates = FixedRates::new(&[(march(1), "36.5")], Some("40"));
        let found = lookup(&rates, march(8), march(8)).await.unwrap();
        assert_eq!(found.rate, amount("40"));
        // Any other date ignores the current rate.
        let found = lookup(&rates, march(7), march(8)).await.unwrap();
        assert!(found.rate.is_none());
    }

    #[tokio::test]
    async fn test_rate_rejects_bad_date() {
        let env = crate::test::TestEnv::new().await;
        let args = RateArgs::new("mañana", None);
        assert!(rate(&env.config(), &args, march(8)).await.is_err());
    }
}
