use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use std::path::Path;
use tracing::info;

use snapgram::backend::cached_client::CachedGateway;
use snapgram::backend::types::{FileUpload, NewPost, NewUser, Post, UpdatePost, UpdateUser, User};
use snapgram::config::Config;
use snapgram::reconcile::{LikeState, PostStats, SaveState};

use crate::commands::{Command, PostCommand, ProfileCommand};

/// Runs one command against the platform and prints the result
pub struct App {
  /// Application configuration
  config: Config,

  /// Cached platform client
  client: CachedGateway,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = CachedGateway::from_config(&config)?;
    Ok(Self { config, client })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    info!(?command, "running command");

    match command {
      Command::SignUp {
        name,
        username,
        email,
        password,
      } => {
        let password = password_or_env(password)?;
        let user = self
          .client
          .create_user_account(NewUser {
            name,
            username,
            email: email.clone(),
            password: password.clone(),
          })
          .await
          .wrap_err("Sign-up failed")?;
        self
          .client
          .sign_in(&email, &password)
          .await
          .wrap_err("Account created but sign-in failed")?;
        println!("Welcome, @{}", user.username);
      }

      Command::SignIn { email, password } => {
        let password = password_or_env(password)?;
        self
          .client
          .sign_in(&email, &password)
          .await
          .wrap_err("Sign-in failed")?;
        let user = self.client.current_user().await?;
        println!("Signed in as @{}", user.username);
      }

      Command::SignOut => {
        self.client.sign_out().await.wrap_err("Sign-out failed")?;
        println!("Signed out");
      }

      Command::Whoami => {
        let user = self.signed_in_user().await?;
        print_user(&user);
      }

      Command::Feed { pages } => self.feed(pages).await?,

      Command::Recent => {
        for post in self.client.recent_posts().await? {
          print_post_line(&post);
        }
      }

      Command::Post(command) => self.post(command).await?,

      Command::Like { post_id } => {
        let user = self.signed_in_user().await?;
        let post = self.client.post_by_id(&post_id).await?;
        let mut stats = PostStats::new(&post, &user, self.config.reconcile.rollback);

        let state = stats
          .toggle_like(&self.client)
          .await
          .wrap_err_with(|| format!("Could not update like on {}", post_id))?;
        let verb = match state {
          LikeState::Liked => "Liked",
          LikeState::NotLiked => "Unliked",
        };
        println!("{} {} ({} likes)", verb, post_id, stats.like_count());
      }

      Command::Save { post_id } => {
        let user = self.signed_in_user().await?;
        let post = self.client.post_by_id(&post_id).await?;
        let mut stats = PostStats::new(&post, &user, self.config.reconcile.rollback);

        let state = stats
          .toggle_save(&self.client)
          .await
          .wrap_err_with(|| format!("Could not update save on {}", post_id))?;
        match state {
          SaveState::Saved => println!("Saved {}", post_id),
          SaveState::NotSaved => println!("Removed {} from saved", post_id),
        }
      }

      Command::Search { term } => {
        let posts = self.client.search_posts(&term).await?;
        if posts.is_empty() {
          println!("No results for '{}'", term);
        }
        for post in posts {
          print_post_line(&post);
        }
      }

      Command::Users { limit } => {
        for user in self.client.users(limit).await? {
          println!("{:<22} @{:<20} {}", user.id, user.username, user.name);
        }
      }

      Command::User { user_id } => {
        let user = self.client.user_by_id(&user_id).await?;
        print_user(&user);
        println!();
        for post in self.client.user_posts(&user.id).await? {
          print_post_line(&post);
        }
      }

      Command::Profile(ProfileCommand::Update { name, bio, image }) => {
        let user = self.signed_in_user().await?;
        let updated = self
          .client
          .update_user(UpdateUser {
            user_id: user.id.clone(),
            name: name.unwrap_or(user.name),
            bio: bio.or(user.bio),
            image_id: user.image_id,
            image_url: user.image_url,
            file: image.as_deref().map(read_image).transpose()?,
          })
          .await
          .wrap_err("Profile update failed")?;
        print_user(&updated);
      }
    }

    Ok(())
  }

  async fn signed_in_user(&self) -> Result<User> {
    if !self.client.session().is_authenticated() {
      return Err(eyre!("Not signed in. Run `snapgram sign-in` first."));
    }
    Ok(self.client.current_user().await?)
  }

  async fn feed(&self, pages: u32) -> Result<()> {
    let mut feed = self.client.infinite_posts();

    for _ in 0..pages {
      let Some(page) = feed.fetch_next_page().await? else {
        break;
      };
      for post in &page.items {
        print_post_line(post);
      }
    }

    if !feed.has_next_page() {
      println!("-- end of feed --");
    }
    Ok(())
  }

  async fn post(&self, command: PostCommand) -> Result<()> {
    match command {
      PostCommand::Show { post_id } => {
        let post = self.client.post_by_id(&post_id).await?;
        print_post(&post);
      }

      PostCommand::Create {
        image,
        caption,
        location,
        tags,
      } => {
        let user = self.signed_in_user().await?;
        let post = self
          .client
          .create_post(NewPost {
            user_id: user.id,
            caption,
            file: read_image(&image)?,
            location,
            tags,
          })
          .await
          .wrap_err("Could not create post")?;
        println!("Created post {}", post.id);
      }

      PostCommand::Update {
        post_id,
        caption,
        image,
        location,
        tags,
      } => {
        let current = self.client.post_by_id(&post_id).await?;
        let post = self
          .client
          .update_post(UpdatePost {
            post_id,
            caption: caption.unwrap_or(current.caption),
            image_id: current.image_id,
            image_url: current.image_url,
            file: image.as_deref().map(read_image).transpose()?,
            location: location.unwrap_or(current.location),
            tags: tags.unwrap_or_else(|| current.tags.join(",")),
          })
          .await
          .wrap_err("Could not update post")?;
        print_post(&post);
      }

      PostCommand::Delete { post_id } => {
        let post = self.client.post_by_id(&post_id).await?;
        self
          .client
          .delete_post(&post.id, &post.image_id)
          .await
          .wrap_err("Could not delete post")?;
        println!("Deleted post {}", post_id);
      }
    }

    Ok(())
  }
}

fn password_or_env(password: Option<String>) -> Result<String> {
  match password {
    Some(p) => Ok(p),
    None => Config::get_password(),
  }
}

fn read_image(path: &Path) -> Result<FileUpload> {
  FileUpload::from_path(path).wrap_err_with(|| format!("Could not read {}", path.display()))
}

fn print_post_line(post: &Post) {
  println!(
    "{:<22} {:>4}♥  {}",
    post.id,
    post.likes.len(),
    post.caption.lines().next().unwrap_or_default()
  );
}

fn print_post(post: &Post) {
  println!("{}", post.caption);
  println!();
  println!("  id:       {}", post.id);
  println!("  by:       {}", post.creator);
  if !post.location.is_empty() {
    println!("  location: {}", post.location);
  }
  if !post.tags.is_empty() {
    println!("  tags:     #{}", post.tags.join(" #"));
  }
  println!("  likes:    {}", post.likes.len());
  println!("  image:    {}", post.image_url);
  println!("  posted:   {}", post.created_at.format("%Y-%m-%d %H:%M"));
}

fn print_user(user: &User) {
  println!("{} (@{})", user.name, user.username);
  if let Some(bio) = user.bio.as_deref().filter(|b| !b.is_empty()) {
    println!("{}", bio);
  }
  println!("  id:     {}", user.id);
  println!("  email:  {}", user.email);
  println!("  saved:  {}", user.saves.len());
  println!("  avatar: {}", user.image_url);
}
