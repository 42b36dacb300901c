use anyhow::Result;

use super::InputArgs;

pub fn run(input: &InputArgs) -> Result<()> {
    let upload = input.upload()?;
    let suggestions = input.reader(input.config()?).suggest(&upload)?;
    println!("{}", serde_json::to_string_pretty(&suggestions)?);
    Ok(())
}
