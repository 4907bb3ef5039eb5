use clap::Parser;
use csv::WriterBuilder;
use env_logger::Env;
use log::{error, info};
use rust_decimal::Decimal;
use std::fs::File;
use std::process::ExitCode;
use token_pnl::config::Args;
use token_pnl::files::FileSource;
use token_pnl::ledger::LedgerState;
use token_pnl::reconcile::ReconciliationStatus;
use token_pnl::report::{q2, q4, q8};
use token_pnl::{Analysis, Analyzer, Envelope, Report, Result};

fn run(args: &Args) -> Result<Analysis> {
    let config = args.engine_config()?;
    let source = FileSource::load(&args.transfers, &args.native, &args.market)?;
    let analyzer = Analyzer::new(source.clone(), source, config);
    let analysis = analyzer.analyze(&args.wallet, &args.token)?;

    if let Some(path) = &args.ledger_out {
        write_ledger(&analysis.ledger, File::create(path)?)?;
        info!("Wrote ledger audit trail: {}", path.display());
    }
    Ok(analysis)
}

fn write_ledger(ledger: &LedgerState, out: File) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(out);
    for row in &ledger.rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn eth(x: Option<Decimal>) -> String {
    x.map(|v| format!("{} ETH", q4(v)))
        .unwrap_or_else(|| "n/a".to_string())
}

fn price(x: Option<Decimal>) -> String {
    x.map(|v| format!("{} ETH", q8(v)))
        .unwrap_or_else(|| "n/a".to_string())
}

fn usd(x: Option<Decimal>) -> String {
    x.map(|v| format!("${}", q2(v)))
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_summary(r: &Report) {
    println!("\n==================================================");
    println!("{} ({}) Analysis", r.token_name, r.token_symbol);
    println!("==================================================");

    println!("\nTransaction Overview");
    println!("   Buy Transactions:  {}", r.buy_count);
    println!("   Sell Transactions: {}", r.sell_count);

    println!("\nToken Position");
    println!("   Tokens Bought:   {}", q2(r.total_tokens_bought));
    println!("   Tokens Sold:     {}", q2(r.total_tokens_sold));
    println!("   Current Balance: {}", q2(r.current_balance));

    println!("\nInvestment Summary");
    println!("   Total Invested: {}", eth(Some(r.total_in_eth)));
    println!("   Total Returned: {}", eth(Some(r.total_out_eth)));
    println!("   Gas Costs:      {}", eth(Some(r.total_gas_eth)));
    println!("   Avg Buy Price:  {}", price(r.avg_buy_price_eth));
    println!("   Avg Sell Price: {}", price(r.avg_sell_price_eth));

    println!("\nCurrent Value");
    println!("   Token Price:    {}", price(r.current_price_eth));
    println!(
        "   Holdings Value: {} ({})",
        eth(r.current_holdings_eth),
        usd(r.current_holdings_usd)
    );
    println!("   ETH Price:      {}", usd(r.eth_price_usd));

    println!("\nProfit/Loss Summary");
    println!(
        "   Realized:   {} ({})",
        eth(Some(r.realized_pnl_eth)),
        usd(r.realized_pnl_usd)
    );
    println!(
        "   Unrealized: {} ({})",
        eth(r.unrealized_pnl_eth),
        usd(r.unrealized_pnl_usd)
    );
    println!(
        "   Total:      {} ({})",
        eth(r.total_pnl_eth),
        usd(r.total_pnl_usd)
    );

    let d = &r.diagnostics;
    println!("\nDiagnostics");
    println!(
        "   Records: {} malformed, {} duplicate, {} ignored",
        d.malformed_records, d.duplicate_records, d.ignored_records
    );
    println!(
        "   Unknown transfers: {}, unpriced trades: {}",
        d.unknown_count, d.unpriced_count
    );
    if d.basis_gap {
        println!(
            "   Basis gap: {} tokens sold without tracked cost basis",
            q8(d.basis_gap_quantity)
        );
    }
    match d.reconciliation.status {
        ReconciliationStatus::Matched => println!("   Balance reconciled with chain"),
        ReconciliationStatus::Mismatch => println!(
            "   Balance MISMATCH: chain reports {}, ledger differs by {}",
            d.reconciliation
                .authoritative_balance
                .map(q8)
                .unwrap_or_default(),
            d.reconciliation.difference.map(q8).unwrap_or_default()
        ),
        ReconciliationStatus::Unverified => {
            println!("   Balance not verified against chain")
        }
    }
    println!("\n==================================================");
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let result = run(&args).map(|a| a.report);
    let failed = result.is_err();

    if args.json {
        let envelope = Envelope::from(result);
        match serde_json::to_string_pretty(&envelope) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                error!("Failed to serialize result: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match &result {
            Ok(report) => print_summary(report),
            Err(e) => error!("{}", e),
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
