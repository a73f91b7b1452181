use crate::HandlerContext;
use gateway_schemas::ReliabilityReport;

pub async fn handle(
    ctx: &HandlerContext,
    correlation_id: &str,
) -> Result<ReliabilityReport, crate::HandlerError> {
    let report = gateway_db::get_reliability_report(&ctx.pool, correlation_id).await?;
    Ok(report)
}
