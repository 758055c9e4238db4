use client::{ClientError, ConvertParams};

pub async fn convert(params: ConvertParams) -> Result<(), ClientError> {
    let saved = client::convert(params).await?;
    client::print_saved(&saved);
    Ok(())
}
