use std::time::Duration;

use futures::StreamExt;
use poise::serenity_prelude::{
    ButtonStyle, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse,
};
use poise::CreateReply;
use tracing::debug;

use crate::{BotContext, BotError};

/// How long a paginated reply keeps listening for button presses.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// The page shown after pressing `custom_id` on page `current` out of `total`.
pub fn turn_page(custom_id: &str, current: usize, total: usize) -> usize {
    match custom_id {
        "page_prev" => current.saturating_sub(1),
        "page_next" => (current + 1).min(total.saturating_sub(1)),
        _ => current,
    }
}

fn page_buttons(current: usize, total: usize) -> Vec<CreateActionRow> {
    vec![CreateActionRow::Buttons(vec![
        CreateButton::new("page_prev")
            .label("Previous")
            .style(ButtonStyle::Secondary)
            .disabled(current == 0),
        CreateButton::new("page_next")
            .label("Next")
            .style(ButtonStyle::Primary)
            .disabled(current + 1 >= total),
    ])]
}

fn page_reply(pages: &[CreateEmbed], current: usize) -> CreateReply {
    let footer = format!("Page {}/{}", current + 1, pages.len());
    let embed = pages[current]
        .clone()
        .footer(CreateEmbedFooter::new(footer));
    CreateReply::default().embed(embed)
}

/// Sends a list of embeds one page at a time, with Previous and Next buttons.
///
/// The buttons are removed once nobody pressed them for [`PAGE_TIMEOUT`].
pub async fn paginate(ctx: BotContext<'_>, pages: Vec<CreateEmbed>) -> Result<(), BotError> {
    if pages.is_empty() {
        return Ok(());
    }
    if pages.len() == 1 {
        ctx.send(page_reply(&pages, 0)).await?;
        return Ok(());
    }

    let mut current = 0;
    let msg = ctx
        .send(page_reply(&pages, current).components(page_buttons(current, pages.len())))
        .await?;

    let mut interaction_collector = msg
        .clone()
        .into_message()
        .await?
        .await_component_interaction(&ctx.serenity_context().shard)
        .author_id(ctx.author().id)
        .timeout(PAGE_TIMEOUT)
        .stream();

    while let Some(interaction) = interaction_collector.next().await {
        current = turn_page(&interaction.data.custom_id, current, pages.len());
        interaction
            .create_response(ctx, CreateInteractionResponse::Acknowledge)
            .await?;
        msg.edit(
            ctx,
            page_reply(&pages, current).components(page_buttons(current, pages.len())),
        )
        .await?;
    }

    debug!("Pagination of {} pages expired", pages.len());
    msg.edit(ctx, page_reply(&pages, current).components(vec![]))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_stay_in_bounds() {
        assert_eq!(turn_page("page_prev", 0, 3), 0);
        assert_eq!(turn_page("page_next", 0, 3), 1);
        assert_eq!(turn_page("page_next", 2, 3), 2);
        assert_eq!(turn_page("page_prev", 2, 3), 1);
        assert_eq!(turn_page("something_else", 1, 3), 1);
    }
}
