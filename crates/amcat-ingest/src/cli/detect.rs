use anyhow::Result;

use super::InputArgs;

pub fn run(input: &InputArgs) -> Result<()> {
    let upload = input.upload()?;
    let summaries = input.reader(input.config()?).detect(&upload)?;

    for summary in &summaries {
        let format = summary
            .format
            .map_or_else(|| "unknown".to_string(), |f| f.to_string());
        let encoding = summary.encoding.as_deref().unwrap_or("-");
        match &summary.error {
            Some(error) => println!("{}\t{format}\t{encoding}\terror: {error}", summary.name),
            None => println!(
                "{}\t{format}\t{encoding}\t{} fragments",
                summary.name, summary.fragments
            ),
        }
    }
    Ok(())
}
