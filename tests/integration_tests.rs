use statement_normalizer::*;
use std::path::PathBuf;

const COMPANY_FACTS: &str = include_str!("fixtures/company_facts.json");

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn processor() -> FinancialStatementProcessor<JsonTaxonomySource> {
    FinancialStatementProcessor::new(
        JsonTaxonomySource::new(fixtures_dir()),
        EngineConfig::default(),
    )
    .unwrap()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("line item missing from draft");
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

/// Same filer with every monetary value doubled.
fn scaled_entity(entity_id: &str, factor: f64) -> anyhow::Result<EntityFacts> {
    let mut set = parse_company_facts(COMPANY_FACTS)?;
    set.entity_id = entity_id.to_string();
    for fact in &mut set.facts {
        if fact.unit.is_currency() {
            fact.value *= factor;
        }
    }
    Ok(EntityFacts::from_fact_set(&set))
}

#[test]
fn test_fiscal_alignment_from_company_facts() -> anyhow::Result<()> {
    let facts = load_entity_facts(COMPANY_FACTS)?;

    assert_eq!(facts.entity_id, "0001234567");
    assert_eq!(facts.taxonomy, Taxonomy::UsGaap);

    let alignment = facts.facts.alignment();
    assert_eq!(alignment.annual_quarter, 3);
    assert_eq!(alignment.year_offset, 0);
    assert!(!alignment.defaulted);

    assert!(!facts
        .facts
        .facts()
        .iter()
        .any(|f| f.fact.tag == "EarningsPerShareBasic" || f.fact.tag == "ProceedsFromIssuanceOfCommonStock"));
    Ok(())
}

#[test]
fn test_annual_income_statement() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    let (draft, log) =
        processor.build_statement_with_log(StatementType::Income, &facts, Period::Year(2023))?;

    assert_close(draft.value("Total Revenue"), 520.0);
    assert_close(draft.value("Cost Of Revenue"), 210.0);
    assert_close(draft.value("Operating Income"), 200.0);
    assert_close(draft.value("Pretax Income"), 190.0);
    assert_close(draft.value("Tax Provision"), 30.0);
    assert_close(draft.value("Net Income"), 160.0);

    // Reported directly, so it beats both the children (310) and the identity.
    let gross = draft.get("Gross Profit").unwrap();
    assert_close(Some(gross.value), 305.0);
    assert_eq!(gross.origin, RowOrigin::Selected);
    assert_eq!(gross.source_code.as_deref(), Some("GrossProfit"));
    assert!(gross.confidence >= 3.0);

    let other = draft.get("Other Non Operating Income Expense").unwrap();
    assert_close(Some(other.value), -10.0);
    assert_eq!(other.origin, RowOrigin::Triangulated);
    assert!(log.contains(
        &"Recalculated 'Other Non Operating Income Expense' using rule 'Pretax Income = Operating Income - Interest Expense + Other Non Operating Income Expense'".to_string()
    ));

    let names: Vec<&str> = draft.line_items().collect();
    assert_eq!(names, StatementType::Income.layout().line_items.to_vec());
    Ok(())
}

#[test]
fn test_cumulative_cash_flow_becomes_quarters() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    let quarters = [
        (Period::quarter(2022, 4)?, 100.0),
        (Period::quarter(2023, 1)?, 150.0),
        (Period::quarter(2023, 2)?, 150.0),
    ];
    for (period, expected) in quarters {
        let draft = processor.build_statement(StatementType::CashFlow, &facts, period)?;
        assert_close(draft.value("Operating Cash Flow"), expected);
    }

    let closing = processor.build_statement(StatementType::CashFlow, &facts, Period::quarter(2023, 3)?)?;
    assert_close(closing.value("Operating Cash Flow"), 160.0);
    assert_close(closing.value("Changes In Cash"), 10.0);
    assert_close(closing.value("Beginning Cash Position"), 80.0);
    assert_close(closing.value("End Cash Position"), 90.0);
    assert_eq!(
        closing.get("Operating Cash Flow").unwrap().origin,
        RowOrigin::AnnualRemainder
    );

    let q2 = processor.build_statement(StatementType::CashFlow, &facts, Period::quarter(2023, 2)?)?;
    assert_close(q2.value("Beginning Cash Position"), 70.0);
    assert_eq!(
        q2.get("Beginning Cash Position").unwrap().origin,
        RowOrigin::Triangulated
    );
    Ok(())
}

#[test]
fn test_balance_sheet() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    let draft = processor.build_statement(StatementType::Balance, &facts, Period::Year(2023))?;

    assert_close(draft.value("Total Assets"), 1000.0);
    assert_close(draft.value("Current Assets"), 400.0);
    assert_close(draft.value("Total Non Current Assets"), 600.0);
    assert_close(draft.value("Total Liabilities Net Minority Interest"), 600.0);
    assert_close(draft.value("Stockholders Equity"), 400.0);
    assert_close(draft.value(SHARES_OUTSTANDING), 14900.0);
    Ok(())
}

#[test]
fn test_rebuild_is_identical() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    for statement in StatementType::ALL {
        for period in [Period::Year(2023), Period::quarter(2023, 1)?, Period::quarter(2023, 3)?] {
            let (first, first_log) = processor.build_statement_with_log(statement, &facts, period)?;
            let (second, second_log) = processor.build_statement_with_log(statement, &facts, period)?;
            assert_eq!(first.to_json()?, second.to_json()?);
            assert_eq!(first_log, second_log);
        }
    }
    Ok(())
}

#[test]
fn test_concurrent_entities_do_not_interfere() -> anyhow::Result<()> {
    let processor = processor();
    let single = scaled_entity("0000000001", 1.0)?;
    let double = scaled_entity("0000000002", 2.0)?;

    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| {
            (0..20)
                .map(|_| {
                    processor
                        .build_statement_with_log(StatementType::Income, &single, Period::Year(2023))
                        .map(|(draft, _)| draft)
                })
                .collect::<Vec<_>>()
        });
        let b = scope.spawn(|| {
            (0..20)
                .map(|_| {
                    processor
                        .build_statement_with_log(StatementType::Income, &double, Period::Year(2023))
                        .map(|(draft, _)| draft)
                })
                .collect::<Vec<_>>()
        });
        (a.join().unwrap(), b.join().unwrap())
    });

    for draft in a {
        assert_close(draft?.value("Total Revenue"), 520.0);
    }
    for draft in b {
        assert_close(draft?.value("Total Revenue"), 1040.0);
    }
    Ok(())
}

#[test]
fn test_batch_and_cache() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    let requests: Vec<StatementRequest> = StatementType::ALL
        .into_iter()
        .map(|statement| StatementRequest {
            facts: &facts,
            statement,
            period: Period::Year(2023),
        })
        .collect();

    let results = processor.build_statements(&requests);
    assert_eq!(results.len(), 3);
    for (request, result) in requests.iter().zip(&results) {
        assert_eq!(result.as_ref().unwrap().statement, request.statement);
    }
    assert_eq!(processor.cache().len(), 3);

    let again = processor.build_statement(StatementType::Income, &facts, Period::Year(2023))?;
    assert!(std::sync::Arc::ptr_eq(results[0].as_ref().unwrap(), &again));
    Ok(())
}

#[test]
fn test_statement_range_and_ttm() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    let table = processor.statement_range(StatementType::Income, &facts, 2022, 2023, true)?;
    assert_eq!(table.columns, vec!["2023Q3", "2023Q2", "2023Q1", "2022Q4"]);
    assert_close(table.value("Total Revenue", "2023Q3"), 120.0);
    assert!(table.to_csv().starts_with("Line Item,2023Q3,2023Q2,2023Q1,2022Q4\n"));

    let ttm = processor.trailing_twelve_months(StatementType::Income, &facts, Period::quarter(2023, 3)?)?;
    assert!(ttm.trailing_twelve_months);
    assert_close(ttm.value("Total Revenue"), 520.0);
    assert_close(ttm.value("Cost Of Revenue"), 210.0);
    assert!(ttm.to_markdown().starts_with("# Income Statement - TTM 2023Q3"));
    Ok(())
}

#[test]
fn test_year_without_facts_stays_unresolved() -> anyhow::Result<()> {
    let processor = processor();
    let facts = load_entity_facts(COMPANY_FACTS)?;

    for statement in StatementType::ALL {
        let (draft, log) = processor.build_statement_with_log(statement, &facts, Period::Year(1999))?;
        assert!(log.is_empty(), "{} logged {:?}", statement, log);
        for row in draft.rows() {
            assert_eq!(row.confidence, 0.0, "{} {}", statement, row.line_item);
            assert_eq!(row.origin, RowOrigin::Unresolved);
        }
    }
    Ok(())
}

#[test]
fn test_missing_taxonomy_is_configuration_error() -> anyhow::Result<()> {
    let processor = processor();
    let mut facts = load_entity_facts(COMPANY_FACTS)?;
    facts.taxonomy = Taxonomy::IfrsFull;

    let err = processor
        .build_statement(StatementType::Income, &facts, Period::Year(2023))
        .unwrap_err();
    assert!(matches!(err, NormalizationError::TaxonomyNotLoaded(_)));
    assert!(err.is_configuration_error());
    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema_json = FactSet::schema_as_json().unwrap();
    assert!(schema_json.contains("entity_id"));
    assert!(schema_json.contains("taxonomy"));
    assert!(schema_json.contains("fiscal_period"));

    let config_schema = serde_json::to_string_pretty(&EngineConfig::generate_json_schema()).unwrap();
    assert!(config_schema.contains("lock_threshold"));
    assert!(config_schema.contains("primary_tolerance"));
}
