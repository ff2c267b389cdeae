use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::services::market_data::{load_market_series, CoinGeckoClient, MarketSeries, OfflineOracle, PriceOracle};
use crate::store::operations::write_table;
use crate::store::queries::{load_combined_tokens, load_proposals};
use crate::store::schema::{PARTICIPATION_COLUMNS, PARTICIPATION_RATES_CSV};
use crate::types::models::{MarketQuote, ParticipationRecord, ProposalRecord, StageSummary};
use crate::types::tokens::TokenRegistry;

/// Returns `(circulating_supply, participation_rate)`. Supply is market
/// cap over price; a non-positive or non-finite supply is unresolved.
pub fn participation_rate(
    token_id: &str,
    date: NaiveDate,
    scores_total: f64,
    quote: MarketQuote,
) -> AnalysisResult<(f64, f64)> {
    let unresolved = || AnalysisError::UnresolvedMarketData { token_id: token_id.to_string(), date };

    if !(quote.price.is_finite() && quote.price > 0.0) {
        return Err(unresolved());
    }
    let circulating_supply = quote.market_cap / quote.price;
    if !(circulating_supply.is_finite() && circulating_supply > 0.0) {
        return Err(unresolved());
    }
    if !scores_total.is_finite() || scores_total < 0.0 {
        return Err(AnalysisError::Input(format!("invalid scores_total {}", scores_total)));
    }
    Ok((circulating_supply, scores_total / circulating_supply))
}

/// Why a quote could not be resolved.
enum QuoteFailure {
    /// Neither source has usable data.
    Missing,
    /// The oracle call itself failed and may succeed on retry.
    Transient(anyhow::Error),
}

fn is_usable(quote: &MarketQuote) -> bool {
    quote.price.is_finite() && quote.price > 0.0 && quote.market_cap.is_finite() && quote.market_cap > 0.0
}

/// Exact-date lookup in the daily series, then the oracle.
async fn resolve_quote<P: PriceOracle>(
    series: Option<&MarketSeries>,
    oracle: &P,
    token_id: &str,
    date: NaiveDate,
) -> Result<MarketQuote, QuoteFailure> {
    if let Some(quote) = series.and_then(|s| s.quote_on(date)) {
        return Ok(quote);
    }
    match oracle.historical_quote(token_id, date).await {
        Ok(Some(quote)) if is_usable(&quote) => Ok(quote),
        Ok(_) => Err(QuoteFailure::Missing),
        Err(e) => Err(QuoteFailure::Transient(e)),
    }
}

#[derive(Debug, Default)]
pub struct ParticipationOutcome {
    pub records: Vec<ParticipationRecord>,
    /// Proposals whose market data could not be resolved.
    pub missing: Vec<(String, NaiveDate)>,
    pub summary: StageSummary,
}

async fn participation_record<P: PriceOracle>(
    proposal: &ProposalRecord,
    date: NaiveDate,
    series: &HashMap<String, MarketSeries>,
    oracle: &P,
    registry: &TokenRegistry,
) -> Result<AnalysisResult<ParticipationRecord>, anyhow::Error> {
    let quote = match resolve_quote(series.get(&proposal.token_id), oracle, &proposal.token_id, date).await {
        Ok(quote) => quote,
        Err(QuoteFailure::Transient(e)) => return Err(e),
        Err(QuoteFailure::Missing) => {
            return Ok(Err(AnalysisError::UnresolvedMarketData {
                token_id: proposal.token_id.clone(),
                date,
            }))
        }
    };

    Ok(participation_rate(&proposal.token_id, date, proposal.scores_total, quote).map(
        |(circulating_supply, rate)| ParticipationRecord {
            token_id: proposal.token_id.clone(),
            name: registry.display_name(&proposal.token_id),
            proposal_id: proposal.proposal_id.clone(),
            date,
            price: quote.price,
            market_cap: quote.market_cap,
            circulating_supply,
            votes: proposal.votes,
            participation_rate: rate,
        },
    ))
}

/// Participation rate of every proposal. Proposals without market data are
/// excluded and listed in `missing`; oracle failures get one retry pass.
pub async fn calculate_participation<P: PriceOracle>(
    proposals: &[ProposalRecord],
    series: &HashMap<String, MarketSeries>,
    oracle: &P,
    registry: &TokenRegistry,
) -> ParticipationOutcome {
    let mut outcome = ParticipationOutcome {
        summary: StageSummary::new("participation"),
        ..Default::default()
    };
    let mut retry: Vec<(&ProposalRecord, NaiveDate)> = Vec::new();

    for proposal in proposals {
        let Some(date) = proposal.end_date() else {
            tracing::warn!("Skipping proposal {}: invalid end timestamp {}", proposal.proposal_id, proposal.end);
            outcome.summary.skip();
            continue;
        };

        match participation_record(proposal, date, series, oracle, registry).await {
            Ok(result) => outcome.accept(proposal, date, result),
            Err(e) => {
                tracing::warn!("Price lookup failed for proposal {} ({}): {:#}", proposal.proposal_id, date, e);
                retry.push((proposal, date));
            }
        }
    }

    if !retry.is_empty() {
        tracing::info!("Retrying {} proposals with failed price lookups", retry.len());
    }
    for (proposal, date) in retry {
        let result = match participation_record(proposal, date, series, oracle, registry).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Retry failed for proposal {}: {:#}", proposal.proposal_id, e);
                Err(AnalysisError::UnresolvedMarketData { token_id: proposal.token_id.clone(), date })
            }
        };
        outcome.accept(proposal, date, result);
    }

    tracing::info!("Total proposals: {}", proposals.len());
    tracing::info!("Successful proposals with market data: {}", outcome.records.len());
    tracing::info!("Missing proposals after retry: {}", outcome.missing.len());
    outcome
}

impl ParticipationOutcome {
    fn accept(&mut self, proposal: &ProposalRecord, date: NaiveDate, result: AnalysisResult<ParticipationRecord>) {
        self.summary.record(&result);
        match result {
            Ok(record) => self.records.push(record),
            Err(e) => {
                tracing::warn!("Excluding proposal {} ({}): {}", proposal.proposal_id, date, e);
                if matches!(e, AnalysisError::UnresolvedMarketData { .. }) {
                    self.missing.push((proposal.proposal_id.clone(), date));
                }
            }
        }
    }
}

pub async fn run_participation_stage(config: &Config) -> Result<StageSummary> {
    let proposals = load_proposals(config)?;
    let names = load_combined_tokens(config)?
        .into_iter()
        .filter_map(|t| t.name.map(|name| (t.id, name)));
    let registry = TokenRegistry::new().with_names(names);

    let token_ids: Vec<String> = proposals
        .iter()
        .map(|p| p.token_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let client = CoinGeckoClient::from_config(config);
    let series = load_market_series(config, client.as_ref(), &token_ids).await?;

    let outcome = match &client {
        Some(client) => calculate_participation(&proposals, &series, client, &registry).await,
        None => calculate_participation(&proposals, &series, &OfflineOracle, &registry).await,
    };

    write_table(&config.path(PARTICIPATION_RATES_CSV), PARTICIPATION_COLUMNS, &outcome.records)?;
    outcome.summary.log();
    Ok(outcome.summary)
}
