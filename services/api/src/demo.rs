use crate::infra::{parse_date, start_of_day, InMemoryEventStore, JsonLinesEventStore};
use chrono::{Duration, NaiveDate};
use clap::Args;
use rust_decimal::Decimal;
use sales_pipeline::config::AppConfig;
use sales_pipeline::error::AppError;
use sales_pipeline::pipeline::{
    EventStore, FixedClock, MetricsView, OpportunityDraft, OpportunityFilter, OpportunityView,
    Phase, PipelineService, PipelineSettings, RiskLevel, SystemClock,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Day the demo pipeline is seeded on (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, default_value = "2025-01-01")]
    pub(crate) start: NaiveDate,
    /// Days of silence simulated before the views are printed.
    #[arg(long, default_value_t = 9)]
    pub(crate) idle_days: i64,
    /// Print the event log produced by the demo.
    #[arg(long)]
    pub(crate) show_events: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ReplayArgs {
    /// JSON-lines event log written by `serve --event-log`
    #[arg(long)]
    pub(crate) event_log: PathBuf,
    /// Print every opportunity after the summary
    #[arg(long)]
    pub(crate) list: bool,
    /// Emit the summary as JSON instead of text
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Serialize)]
struct ReplaySummary<'a> {
    event_log: &'a Path,
    events: usize,
    opportunities: usize,
    reviews: usize,
    metrics: MetricsView,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    listing: Vec<OpportunityView>,
}

fn draft(name: &str, client: &str, value: i64, assigned_to: &str) -> OpportunityDraft {
    OpportunityDraft {
        name: name.to_string(),
        client: client.to_string(),
        description: format!("{name} proposal for {client}"),
        estimated_value: Some(Decimal::from(value)),
        assigned_to: assigned_to.to_string(),
        campaign_code: None,
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start,
        idle_days,
        show_events,
    } = args;

    let clock = Arc::new(FixedClock::new(start_of_day(start)));
    let store = Arc::new(InMemoryEventStore::default());
    let service = PipelineService::new(store.clone(), clock.clone(), PipelineSettings::default());

    println!("Sales pipeline demo (seeded {start})");

    let alpha = service.create_opportunity(draft("Alpha", "Northwind", 10_000, "ana"), "ana")?;
    let beta = service.create_opportunity(draft("Beta", "Contoso", 40_000, "ana"), "ana")?;
    let gamma = service.create_opportunity(draft("Gamma", "Fabrikam", 25_000, "luis"), "luis")?;
    let delta = service.create_opportunity(draft("Delta", "Initech", 8_000, "luis"), "luis")?;

    let review = service.request_presales_review(beta.id, "ana")?;
    println!("  {} requested review {} for {}", review.requester, review.id, beta.code);
    let blocked = service.advance(alpha.id, Phase::Presales, "ana");
    if let Err(err) = blocked {
        println!("  {} blocked: {err} [{}]", alpha.code, err.kind());
    }
    service.decide_review(review.id, "maria", true)?;
    service.advance(beta.id, Phase::Presales, "ana")?;

    let review = service.request_presales_review(gamma.id, "luis")?;
    service.decide_review(review.id, "maria", true)?;
    for phase in [
        Phase::Presales,
        Phase::Delivery,
        Phase::Collection,
        Phase::Postsale,
    ] {
        service.advance(gamma.id, phase, "luis")?;
    }
    service.record_contract_value(gamma.id, Decimal::from(23_750), "luis")?;
    service.advance(gamma.id, Phase::ClosedWon, "luis")?;
    service.close_lost(delta.id, "luis")?;

    clock.advance(Duration::days(idle_days));
    service.register_contact(beta.id, "ana", None)?;

    println!(
        "\nOpportunities after {idle_days} idle days ({})",
        service.now().format("%Y-%m-%d")
    );
    render_views(&service.query(&OpportunityFilter::default()));

    let at_risk = service.query(&OpportunityFilter::default().with_risk(RiskLevel::AtRisk));
    println!("\nAt risk: {}", codes(&at_risk));

    println!();
    render_metrics(&service.metrics());

    if show_events {
        println!("\nEvent log");
        for event in store.events() {
            println!(
                "  #{:<3} {:<22} opportunity {:<3} by {:<5} at {}",
                event.sequence,
                event.kind().as_str(),
                event.opportunity_id,
                event.actor,
                event.at.format("%Y-%m-%d")
            );
        }
    }

    Ok(())
}

pub(crate) fn run_replay(args: ReplayArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let unusable = |source| AppError::event_log(source, Some(args.event_log.clone()));
    let store = Arc::new(JsonLinesEventStore::new(&args.event_log));
    let events = store.load_all().map_err(unusable)?.len();
    let service =
        PipelineService::restore(store, Arc::new(SystemClock), config.pipeline).map_err(unusable)?;
    let snapshot = service.snapshot();
    let listing = if args.list {
        service.query(&OpportunityFilter::default())
    } else {
        Vec::new()
    };

    if args.json {
        let summary = ReplaySummary {
            event_log: &args.event_log,
            events,
            opportunities: snapshot.opportunities.len(),
            reviews: snapshot.reviews.len(),
            metrics: service.metrics(),
            listing,
        };
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|err| AppError::Io(io::Error::new(io::ErrorKind::Other, err)))?;
        println!("{rendered}");
        return Ok(());
    }

    println!(
        "Replayed {events} events from {} ({} opportunities, {} reviews)",
        args.event_log.display(),
        snapshot.opportunities.len(),
        snapshot.reviews.len()
    );
    println!();
    render_metrics(&service.metrics());

    if !listing.is_empty() {
        println!();
        render_views(&listing);
    }
    Ok(())
}

fn codes(views: &[OpportunityView]) -> String {
    if views.is_empty() {
        return "none".to_string();
    }
    views
        .iter()
        .map(|view| view.code.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_views(views: &[OpportunityView]) {
    for view in views {
        println!(
            "  {} {:<8} {:<10} {:<14} {:>3}% {:>10} {:<5} stale {:>2}d {}",
            view.code,
            view.name,
            view.client,
            view.phase_label,
            view.close_probability,
            view.estimated_value,
            view.assigned_to,
            view.days_stale,
            view.risk_label
        );
    }
}

fn render_metrics(metrics: &MetricsView) {
    println!("Pipeline metrics");
    println!("  open opportunities: {}", metrics.open_count);
    println!("  pipeline total:     {}", metrics.pipeline_total);
    println!("  pipeline weighted:  {}", metrics.pipeline_weighted);
    println!("  average value:      {}", metrics.average_value);
    let risk = RiskLevel::ordered()
        .into_iter()
        .map(|level| {
            format!(
                "{} {}",
                level.label(),
                metrics.count_by_risk.get(&level).copied().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    println!("  by risk:            {risk}");
    println!(
        "  won:                {} ({})",
        metrics.won_count, metrics.won_value
    );
    println!("  lost:               {}", metrics.lost_count);
    println!("  pending reviews:    {}", metrics.pending_reviews);
}
