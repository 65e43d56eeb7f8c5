//! `select team, count(*), sum(points), max(points), avg(points) group by team`
//!
//! Run with `RUST_LOG=debug` to see the build statistics of the aggregation

use std::sync::Arc;

use hashagg::common::client_context::{ClientContext, ExecArgs};
use hashagg::common::uuid::QueryId;
use hashagg::exec::physical_expr::field_ref::FieldRef;
use hashagg::exec::physical_expr::function::aggregate::avg::Avg;
use hashagg::exec::physical_expr::function::aggregate::count::CountStar;
use hashagg::exec::physical_expr::function::aggregate::min_max::Max;
use hashagg::exec::physical_expr::function::aggregate::sum::Sum;
use hashagg::exec::physical_expr::function::aggregate::{AggregationFunction, AggregationMode};
use hashagg::exec::physical_expr::PhysicalExpr;
use hashagg::exec::physical_operator::aggregation::{AggregationNode, AggregationNodeOptions};
use hashagg::exec::physical_operator::memory_table_scan::MemoryTableScan;
use hashagg::exec::physical_operator::{OpenStatus, PhysicalOperator, SourceExecStatus};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tuple_block::batch::RowBatch;
use tuple_block::scalar::ScalarImpl;
use tuple_block::types::LogicalType;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let games = [
        ("Warriors", Some(121)),
        ("Lakers", Some(104)),
        ("Warriors", Some(99)),
        ("Celtics", None),
        ("Lakers", Some(117)),
        ("Warriors", Some(130)),
        ("Celtics", Some(112)),
    ];
    let rows = games
        .iter()
        .map(|(team, points)| {
            vec![
                Some(ScalarImpl::String(team.to_string())),
                points.map(ScalarImpl::Int32),
            ]
        })
        .collect();
    let input = MemoryTableScan::try_new([LogicalType::VarChar, LogicalType::Integer], rows)
        .unwrap();

    let points: Arc<dyn PhysicalExpr> = Arc::new(FieldRef::new(1, LogicalType::Integer));
    let funcs: Vec<Arc<dyn AggregationFunction>> = vec![
        Arc::new(CountStar::new()),
        Arc::new(Sum::try_new(Arc::clone(&points), AggregationMode::Update).unwrap()),
        Arc::new(Max::try_new(Arc::clone(&points), AggregationMode::Update).unwrap()),
        Arc::new(Avg::try_new(points, AggregationMode::Update).unwrap()),
    ];
    let mut node = AggregationNode::try_new(
        Box::new(input),
        vec![Arc::new(FieldRef::new(0, LogicalType::VarChar))],
        funcs,
        AggregationNodeOptions::default(),
    )
    .unwrap();
    println!("{}", &node as &dyn PhysicalOperator);

    let client_ctx = ClientContext::new(
        QueryId::random(),
        ExecArgs {
            batch_size: 4,
            ..Default::default()
        },
    );
    let now = std::time::Instant::now();
    node.prepare(&client_ctx).unwrap();
    if node.open(&client_ctx).unwrap() == OpenStatus::Cancelled {
        return;
    }
    let mut output = RowBatch::new(
        Arc::clone(node.output_descriptor()),
        client_ctx.exec_args.batch_size,
    );
    while node.get_next(&client_ctx, &mut output).unwrap() == SourceExecStatus::HaveMoreOutput {
        println!("{}", output);
    }
    println!("Elapsed: {:?}", now.elapsed());
    println!("{}", node.metrics());
    node.close();
}
